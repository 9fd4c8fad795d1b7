//! Frame graph: pass dependency ordering derived from declared resource usage.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Pass kinds a backend executes. `RefitAccel` runs on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    ClearSdf,
    BuildSdf,
    RefitAccel,
    UpdateSdf,
    Visibility,
    ShadeVolume,
    GenerateMips,
    Shade,
    Resolve,
}

/// Resources passes hand to each other within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameResource {
    Constants,
    Tlas,
    Sdf,
    Visibility,
    Irradiance,
    Hdr,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    Read,
    Write,
    ReadWrite,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        matches!(self, ResourceUsage::Write | ResourceUsage::ReadWrite)
    }
    pub fn is_read(&self) -> bool {
        matches!(self, ResourceUsage::Read | ResourceUsage::ReadWrite)
    }
}

impl PassKind {
    /// What the pass reads and writes.
    pub fn usage(self) -> &'static [(FrameResource, ResourceUsage)] {
        use FrameResource::*;
        use ResourceUsage::*;
        match self {
            PassKind::ClearSdf => &[(Sdf, Write)],
            PassKind::BuildSdf => &[(Constants, Read), (Tlas, Read), (Sdf, ReadWrite)],
            PassKind::RefitAccel => &[(Constants, Read), (Tlas, ReadWrite)],
            PassKind::UpdateSdf => &[(Constants, Read), (Tlas, Read), (Sdf, ReadWrite)],
            PassKind::Visibility => &[(Constants, Read), (FrameResource::Visibility, Write)],
            PassKind::ShadeVolume => &[(Constants, Read), (Sdf, Read), (Irradiance, Write)],
            PassKind::GenerateMips => &[(Irradiance, ReadWrite)],
            PassKind::Shade => &[
                (Constants, Read),
                (FrameResource::Visibility, Read),
                (Sdf, Read),
                (Irradiance, Read),
                (Hdr, Write),
            ],
            PassKind::Resolve => &[(Hdr, Read), (Output, Write)],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PassKind::ClearSdf => "clear_sdf",
            PassKind::BuildSdf => "build_sdf",
            PassKind::RefitAccel => "refit_accel",
            PassKind::UpdateSdf => "update_sdf",
            PassKind::Visibility => "visibility",
            PassKind::ShadeVolume => "shade_volume",
            PassKind::GenerateMips => "generate_mips",
            PassKind::Shade => "shade",
            PassKind::Resolve => "resolve",
        }
    }
}

#[derive(Default)]
pub struct FrameGraph {
    passes: Vec<PassKind>,
    edges: Vec<(NodeId, NodeId)>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: PassKind) -> NodeId {
        self.passes.push(pass);
        NodeId(self.passes.len() - 1)
    }

    pub fn add_edge(&mut self, before: NodeId, after: NodeId) {
        self.edges.push((before, after));
    }

    pub fn passes(&self) -> &[PassKind] {
        &self.passes
    }

    /// Explicit edges plus read-after-write, write-after-read and write-after-write hazards,
    /// each pointing from the earlier submitted pass to the later one.
    pub fn dependencies(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = self.edges.clone();
        for (b, later) in self.passes.iter().enumerate() {
            for (a, earlier) in self.passes.iter().enumerate().take(b) {
                let hazard = earlier.usage().iter().any(|&(res, ua)| {
                    later.usage().iter().any(|&(rb, ub)| rb == res && (ua.is_write() || ub.is_write()))
                });
                if hazard {
                    edges.push((NodeId(a), NodeId(b)));
                }
            }
        }
        edges
    }

    /// Kahn's algorithm, lowest ready index first so independent passes keep submission order.
    pub fn topological_order(&self) -> Result<Vec<PassKind>> {
        let n = self.passes.len();
        let mut in_degree = vec![0usize; n];
        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (NodeId(a), NodeId(b)) in self.dependencies() {
            if a < n && b < n {
                in_degree[b] += 1;
                out_edges[a].push(b);
            }
        }
        let mut ready: std::collections::BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(u) = ready.pop_first() {
            order.push(self.passes[u]);
            for &v in &out_edges[u] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.insert(v);
                }
            }
        }
        if order.len() != n {
            return Err(Error::Graph(format!("frame graph has a cycle ({} of {} passes scheduled)", order.len(), n)));
        }
        Ok(order)
    }

    /// Warm-up frame. The first one clears the distance volume before sampling.
    pub fn warmup(first_frame: bool) -> Self {
        let mut g = Self::new();
        if first_frame {
            g.add_pass(PassKind::ClearSdf);
        }
        g.add_pass(PassKind::BuildSdf);
        g.add_lighting();
        g
    }

    pub fn steady() -> Self {
        let mut g = Self::new();
        g.add_pass(PassKind::RefitAccel);
        g.add_pass(PassKind::UpdateSdf);
        g.add_lighting();
        g
    }

    fn add_lighting(&mut self) {
        for pass in [PassKind::Visibility, PassKind::ShadeVolume, PassKind::GenerateMips, PassKind::Shade, PassKind::Resolve] {
            self.add_pass(pass);
        }
    }
}

/// Pass orders of each phase, scheduled once.
#[derive(Debug, Clone)]
pub struct PhaseSchedules {
    pub first_warmup: Vec<PassKind>,
    pub warmup: Vec<PassKind>,
    pub steady: Vec<PassKind>,
}

impl PhaseSchedules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            first_warmup: FrameGraph::warmup(true).topological_order()?,
            warmup: FrameGraph::warmup(false).topological_order()?,
            steady: FrameGraph::steady().topological_order()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_frame_refits_before_update_and_lights_after() {
        let order = FrameGraph::steady().topological_order().unwrap();
        assert_eq!(
            order,
            vec![
                PassKind::RefitAccel,
                PassKind::UpdateSdf,
                PassKind::Visibility,
                PassKind::ShadeVolume,
                PassKind::GenerateMips,
                PassKind::Shade,
                PassKind::Resolve,
            ]
        );
    }

    #[test]
    fn first_warmup_clears_before_building() {
        let s = PhaseSchedules::new().unwrap();
        assert_eq!(&s.first_warmup[..2], &[PassKind::ClearSdf, PassKind::BuildSdf]);
        assert!(!s.warmup.contains(&PassKind::ClearSdf));
        assert_eq!(s.warmup[0], PassKind::BuildSdf);
    }

    #[test]
    fn hazards_are_derived_from_usage() {
        let g = FrameGraph::warmup(true);
        let deps = g.dependencies();
        // clear -> build (WAW on the volume), shade_volume -> shade (RAW on irradiance)
        assert!(deps.contains(&(NodeId(0), NodeId(1))));
        assert!(deps.contains(&(NodeId(3), NodeId(5))));
        // visibility and shade_volume share only read-only constants
        assert!(!deps.contains(&(NodeId(2), NodeId(3))));
    }

    #[test]
    fn explicit_back_edge_is_a_cycle() {
        let mut g = FrameGraph::new();
        let vis = g.add_pass(PassKind::Visibility);
        g.add_pass(PassKind::Shade);
        let resolve = g.add_pass(PassKind::Resolve);
        g.add_edge(resolve, vis);
        assert!(matches!(g.topological_order(), Err(Error::Graph(_))));
    }
}
