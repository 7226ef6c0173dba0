//! Filter graph: an arena of filter nodes compiled into processing chains.
//!
//! Nodes live in a [`petgraph`] stable graph and are addressed by
//! [`FilterId`]. Edges point from a parent to its children, weighted by
//! append order. A node's chain is the pre-order flattening of the tree below
//! it: the node's own stage, then every child's chain in append order.
//!
//! ```
//! use bewegt::filter::{FilterGraph, FilterKind, FilterParams};
//! use bewegt::{Block, Format};
//!
//! let graph = FilterGraph::new();
//! let root = graph.create(FilterKind::Group).unwrap();
//! let scale = graph.create(FilterKind::Scale).unwrap();
//! graph.set_params(scale, &[FilterParams::Scale { factor: 0.5 }]).unwrap();
//! graph.append(root, scale).unwrap();
//!
//! graph.build(root, &Format::default(), None).unwrap();
//! let mut block = Block::from_interleaved(3, vec![100.0, 200.0, 300.0]);
//! graph.process(root, &mut block).unwrap();
//! assert_eq!(block.as_slice(), &[50.0, 100.0, 150.0]);
//! ```

pub mod params;
mod stage;
pub mod stages;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::sample::Block;

pub use params::{CombineMode, FilterParams, KinematicsVersion};
pub use stage::CustomFilter;

use stage::{SharedCustom, Stage};

/// Most stages a single chain may hold.
pub const FILTER_STAGES_MAX: usize = 64;

/// Handle to a node in a [`FilterGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(NodeIndex);

/// What a filter node does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Groups children; no processing of its own.
    Group,
    Noise,
    Mean,
    Highpass,
    Lowpass,
    Integral,
    Tilt,
    Scale,
    Offset,
    Combine,
    Limit,
    RateLimit,
    Washout,
    Kinematics,
    Format,
    Channel,
    Custom,
}

impl FilterKind {
    pub const ALL: [FilterKind; 17] = [
        FilterKind::Group,
        FilterKind::Noise,
        FilterKind::Mean,
        FilterKind::Highpass,
        FilterKind::Lowpass,
        FilterKind::Integral,
        FilterKind::Tilt,
        FilterKind::Scale,
        FilterKind::Offset,
        FilterKind::Combine,
        FilterKind::Limit,
        FilterKind::RateLimit,
        FilterKind::Washout,
        FilterKind::Kinematics,
        FilterKind::Format,
        FilterKind::Channel,
        FilterKind::Custom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Group => "group",
            FilterKind::Noise => "noise",
            FilterKind::Mean => "mean",
            FilterKind::Highpass => "highpass",
            FilterKind::Lowpass => "lowpass",
            FilterKind::Integral => "integral",
            FilterKind::Tilt => "tilt",
            FilterKind::Scale => "scale",
            FilterKind::Offset => "offset",
            FilterKind::Combine => "combine",
            FilterKind::Limit => "limit",
            FilterKind::RateLimit => "ratelimit",
            FilterKind::Washout => "washout",
            FilterKind::Kinematics => "kinematics",
            FilterKind::Format => "format",
            FilterKind::Channel => "channel",
            FilterKind::Custom => "custom",
        }
    }

    pub fn detail(self) -> &'static str {
        match self {
            FilterKind::Group => "ordered group of child filters",
            FilterKind::Noise => "Kalman noise reduction",
            FilterKind::Mean => "moving average",
            FilterKind::Highpass => "high-pass filter",
            FilterKind::Lowpass => "low-pass filter",
            FilterKind::Integral => "integrator",
            FilterKind::Tilt => "tilt coordination",
            FilterKind::Scale => "scales the range of motion",
            FilterKind::Offset => "moves the range of motion",
            FilterKind::Combine => "combines two channels",
            FilterKind::Limit => "value limiter",
            FilterKind::RateLimit => "rate limiter",
            FilterKind::Washout => "washout filter",
            FilterKind::Kinematics => "inverse kinematics to actuator lengths",
            FilterKind::Format => "sample encoding converter",
            FilterKind::Channel => "channel mapper",
            FilterKind::Custom => "caller-supplied processor",
        }
    }
}

/// Effort reported by a processing run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub frames: usize,
    pub elapsed: Duration,
}

/// A compiled, owned filter chain.
///
/// Chains carry the node revisions they were compiled from so the graph can
/// tell when they are stale.
#[derive(Debug)]
pub struct FilterChain {
    root: Option<FilterId>,
    stages: Vec<Stage>,
    src: Format,
    dst: Format,
    deps: Vec<(NodeIndex, u64)>,
    revision: u64,
}

impl FilterChain {
    /// Adapter-only chain for streams that have no filter attached.
    pub(crate) fn passthrough(src: &Format, dst: &Format) -> Self {
        let stages = stage::adapter(src, dst);
        Self {
            root: None,
            stages,
            src: *src,
            dst: src.with_channels(dst.channels()).with_encoding(dst.encoding()),
            deps: Vec::new(),
            revision: 0,
        }
    }

    /// Node this chain was compiled from, if any.
    pub fn root(&self) -> Option<FilterId> {
        self.root
    }

    pub fn src_format(&self) -> Format {
        self.src
    }

    pub fn dst_format(&self) -> Format {
        self.dst
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage, left to right, in place.
    ///
    /// The block must have the source format's channel count. This does not
    /// check for staleness; see [`FilterGraph::is_fresh`].
    pub fn process(&mut self, block: &mut Block) -> ProcessStats {
        let start = Instant::now();
        for stage in self.stages.iter_mut() {
            stage.process(block);
        }
        ProcessStats {
            frames: block.frames(),
            elapsed: start.elapsed(),
        }
    }

    /// Clear all filter history.
    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(Stage::reset);
    }

    /// Time constant of the first washout stage on channel `ch`, in seconds.
    pub fn washout_time_constant(&self, ch: usize) -> Option<f64> {
        self.stages.iter().find_map(|s| s.time_constant(ch))
    }
}

struct Node {
    kind: FilterKind,
    params: Vec<FilterParams>,
    custom: Option<SharedCustom>,
    revision: u64,
    built: Option<FilterChain>,
}

struct Arena {
    graph: StableGraph<Node, u64, Directed>,
    next_edge: u64,
}

impl Arena {
    fn node(&self, id: FilterId) -> Result<&Node> {
        self.graph
            .node_weight(id.0)
            .ok_or_else(|| Error::validation(format!("unknown filter {id:?}")))
    }

    fn node_mut(&mut self, id: FilterId) -> Result<&mut Node> {
        self.graph
            .node_weight_mut(id.0)
            .ok_or_else(|| Error::validation(format!("unknown filter {id:?}")))
    }

    fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<(u64, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        edges.sort_unstable_by_key(|(order, _)| *order);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    fn flatten(&self, idx: NodeIndex, out: &mut Vec<NodeIndex>) -> Result<()> {
        if out.len() >= FILTER_STAGES_MAX {
            return Err(Error::capacity(format!(
                "filter chain exceeds {FILTER_STAGES_MAX} nodes"
            )));
        }
        out.push(idx);
        for child in self.children(idx) {
            self.flatten(child, out)?;
        }
        Ok(())
    }

    fn is_fresh(&self, chain: &FilterChain) -> bool {
        chain.deps.iter().all(|(idx, rev)| {
            self.graph
                .node_weight(*idx)
                .is_some_and(|n| n.revision == *rev)
        })
    }

    fn compile(&self, root: FilterId, src: &Format, dst: Option<&Format>, revision: u64) -> Result<FilterChain> {
        self.node(root)?;
        let mut order = Vec::new();
        self.flatten(root.0, &mut order)?;

        let mut stages = Vec::with_capacity(order.len());
        let mut deps = Vec::with_capacity(order.len());
        let mut format = *src;
        for idx in order {
            let node = &self.graph[idx];
            deps.push((idx, node.revision));
            let (stage, out) = stage::build(node.kind, &node.params, node.custom.as_ref(), &format)?;
            stages.extend(stage);
            format = out;
        }
        if let Some(dst) = dst {
            stages.extend(stage::adapter(&format, dst));
            format = format.with_channels(dst.channels()).with_encoding(dst.encoding());
        }
        if stages.len() > FILTER_STAGES_MAX {
            return Err(Error::capacity(format!(
                "filter chain exceeds {FILTER_STAGES_MAX} stages"
            )));
        }
        Ok(FilterChain {
            root: Some(root),
            stages,
            src: *src,
            dst: format,
            deps,
            revision,
        })
    }
}

struct Shared {
    arena: Mutex<Arena>,
    revision: AtomicU64,
}

/// Shared arena of filter nodes.
///
/// Cloning the graph clones the handle; all clones see the same nodes.
#[derive(Clone)]
pub struct FilterGraph {
    shared: Arc<Shared>,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for FilterGraph {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for FilterGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterGraph")
            .field("revision", &self.shared.revision.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                arena: Mutex::new(Arena {
                    graph: StableGraph::default(),
                    next_edge: 0,
                }),
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Revision number for a mutation. Must be called with the arena locked.
    fn bump(&self) -> u64 {
        self.shared.revision.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Create a built-in filter. Use [`create_custom`](Self::create_custom) for custom ones.
    pub fn create(&self, kind: FilterKind) -> Result<FilterId> {
        if kind == FilterKind::Custom {
            return Err(Error::validation("custom filters need a processor"));
        }
        Ok(self.insert(kind, None))
    }

    pub fn create_custom<F: CustomFilter + 'static>(&self, processor: F) -> FilterId {
        let custom: SharedCustom = Arc::new(Mutex::new(processor));
        self.insert(FilterKind::Custom, Some(custom))
    }

    fn insert(&self, kind: FilterKind, custom: Option<SharedCustom>) -> FilterId {
        let mut arena = self.shared.arena.lock();
        let revision = self.bump();
        let idx = arena.graph.add_node(Node {
            kind,
            params: Vec::new(),
            custom,
            revision,
            built: None,
        });
        trace!(?kind, ?idx, "filter created");
        FilterId(idx)
    }

    pub fn kind(&self, id: FilterId) -> Result<FilterKind> {
        Ok(self.shared.arena.lock().node(id)?.kind)
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.shared.arena.lock().graph.contains_node(id.0)
    }

    /// Remove a node. Fails while it is still appended to a parent.
    pub fn delete(&self, id: FilterId) -> Result<()> {
        let mut arena = self.shared.arena.lock();
        arena.node(id)?;
        if arena
            .graph
            .neighbors_directed(id.0, Direction::Incoming)
            .next()
            .is_some()
        {
            return Err(Error::state(format!("filter {id:?} is still appended to a parent")));
        }
        arena.graph.remove_node(id.0);
        self.bump();
        trace!(?id, "filter deleted");
        Ok(())
    }

    /// Replace a node's parameters. One record applies to every channel.
    pub fn set_params(&self, id: FilterId, params: &[FilterParams]) -> Result<()> {
        params::check_count(params.len())?;
        let mut arena = self.shared.arena.lock();
        let kind = arena.node(id)?.kind;
        for p in params {
            if p.kind() != kind {
                return Err(Error::validation(format!(
                    "{:?} parameters on a {kind:?} filter",
                    p.kind()
                )));
            }
            p.validate()?;
        }
        let revision = self.bump();
        let node = arena.node_mut(id)?;
        node.params = params.to_vec();
        node.revision = revision;
        Ok(())
    }

    /// Replace a node's parameters from `count` packed records of `size` bytes.
    pub fn set_params_raw(&self, id: FilterId, data: &[u8], size: usize, count: usize) -> Result<()> {
        let kind = self.kind(id)?;
        let records = params::decode_records(kind, data, size, count)?;
        self.set_params(id, &records)
    }

    /// Current parameters, or the kind's default record when none were set.
    pub fn get_params(&self, id: FilterId) -> Result<Vec<FilterParams>> {
        let arena = self.shared.arena.lock();
        let node = arena.node(id)?;
        if node.params.is_empty() {
            return Ok(FilterParams::default_for(node.kind).into_iter().collect());
        }
        Ok(node.params.clone())
    }

    /// Current parameters as packed records, with the record size.
    pub fn get_params_raw(&self, id: FilterId) -> Result<(Vec<u8>, usize)> {
        let kind = self.kind(id)?;
        let size = FilterParams::record_size(kind)
            .ok_or_else(|| Error::validation(format!("{kind:?} filters take no parameters")))?;
        let mut out = Vec::new();
        for p in self.get_params(id)? {
            p.encode(&mut out);
        }
        Ok((out, size))
    }

    /// Insert `child` at the tail of `parent`'s chain.
    pub fn append(&self, parent: FilterId, child: FilterId) -> Result<()> {
        let mut arena = self.shared.arena.lock();
        arena.node(parent)?;
        arena.node(child)?;
        if parent == child || has_path_connecting(&arena.graph, child.0, parent.0, None) {
            return Err(Error::validation(format!(
                "appending {child:?} under {parent:?} would form a cycle"
            )));
        }
        if arena.graph.find_edge(parent.0, child.0).is_some() {
            return Err(Error::validation(format!("{child:?} is already appended to {parent:?}")));
        }
        let order = arena.next_edge;
        arena.next_edge += 1;
        arena.graph.add_edge(parent.0, child.0, order);
        let revision = self.bump();
        arena.node_mut(parent)?.revision = revision;
        Ok(())
    }

    /// Detach `child` from `parent`. Fails if it is not there.
    pub fn remove(&self, parent: FilterId, child: FilterId) -> Result<()> {
        let mut arena = self.shared.arena.lock();
        arena.node(parent)?;
        let edge = arena
            .graph
            .find_edge(parent.0, child.0)
            .ok_or_else(|| Error::validation(format!("{child:?} is not a child of {parent:?}")))?;
        arena.graph.remove_edge(edge);
        let revision = self.bump();
        arena.node_mut(parent)?.revision = revision;
        Ok(())
    }

    /// Children of `id` in append order.
    pub fn children(&self, id: FilterId) -> Result<Vec<FilterId>> {
        let arena = self.shared.arena.lock();
        arena.node(id)?;
        Ok(arena.children(id.0).into_iter().map(FilterId).collect())
    }

    /// Compile `id` for `src` and keep the result on the node for [`process`](Self::process).
    ///
    /// When `dst` is given and differs from the resolved format, channels are
    /// fitted and samples converted to match it. The adapter does not
    /// resample. On failure the previous build is left untouched.
    pub fn build(&self, id: FilterId, src: &Format, dst: Option<&Format>) -> Result<Format> {
        let mut arena = self.shared.arena.lock();
        let revision = self.shared.revision.load(Ordering::Acquire);
        let chain = arena.compile(id, src, dst, revision)?;
        let resolved = chain.dst;
        debug!(?id, stages = chain.len(), ?src, ?resolved, "filter built");
        arena.node_mut(id)?.built = Some(chain);
        Ok(resolved)
    }

    /// Compile `id` into an owned chain without touching the node's own build.
    pub fn compile(&self, id: FilterId, src: &Format, dst: Option<&Format>) -> Result<FilterChain> {
        let arena = self.shared.arena.lock();
        let revision = self.shared.revision.load(Ordering::Acquire);
        arena.compile(id, src, dst, revision)
    }

    /// [`compile`](Self::compile) with a bounded wait on the arena.
    ///
    /// `Ok(None)` means the arena stayed locked for the whole `budget`.
    pub(crate) fn try_compile(
        &self,
        id: FilterId,
        src: &Format,
        dst: &Format,
        budget: Duration,
    ) -> Result<Option<FilterChain>> {
        let Some(arena) = self.shared.arena.try_lock_for(budget) else {
            return Ok(None);
        };
        let revision = self.shared.revision.load(Ordering::Acquire);
        arena.compile(id, src, Some(dst), revision).map(Some)
    }

    /// Whether `id` has a build that is still current.
    pub fn is_built(&self, id: FilterId) -> bool {
        let arena = self.shared.arena.lock();
        match arena.node(id).ok().and_then(|n| n.built.as_ref()) {
            Some(chain) => arena.is_fresh(chain),
            None => false,
        }
    }

    /// Whether `chain` still matches every node it was compiled from.
    pub fn is_fresh(&self, chain: &FilterChain) -> bool {
        if self.shared.revision.load(Ordering::Acquire) == chain.revision {
            return true;
        }
        self.shared.arena.lock().is_fresh(chain)
    }

    /// Bounded-wait freshness check for the mixer.
    ///
    /// Returns `None` if the arena could not be locked within `budget`. A
    /// chain found fresh adopts the current revision so later checks stay
    /// lock-free until the next mutation.
    pub(crate) fn refresh(&self, chain: &mut FilterChain, budget: Duration) -> Option<bool> {
        if self.shared.revision.load(Ordering::Acquire) == chain.revision {
            return Some(true);
        }
        let arena = self.shared.arena.try_lock_for(budget)?;
        let fresh = arena.is_fresh(chain);
        if fresh {
            chain.revision = self.shared.revision.load(Ordering::Acquire);
        }
        Some(fresh)
    }

    /// Run the node's built chain over `block` in place.
    pub fn process(&self, id: FilterId, block: &mut Block) -> Result<ProcessStats> {
        let mut arena = self.shared.arena.lock();
        let node = arena.node(id)?;
        let chain = node
            .built
            .as_ref()
            .ok_or_else(|| Error::state(format!("filter {id:?} has not been built")))?;
        if !arena.is_fresh(chain) {
            return Err(Error::BuildStale(id));
        }
        if block.channels() != chain.src.channels() {
            return Err(Error::validation(format!(
                "block has {} channels, chain was built for {}",
                block.channels(),
                chain.src.channels()
            )));
        }
        let chain = arena
            .node_mut(id)?
            .built
            .as_mut()
            .ok_or_else(|| Error::state(format!("filter {id:?} has not been built")))?;
        let stats = chain.process(block);
        trace!(?id, frames = stats.frames, elapsed = ?stats.elapsed, "filter processed");
        Ok(stats)
    }

    /// Decode `input` with the build's source format, process it, and append
    /// the result encoded in the destination format to `output`.
    pub fn process_bytes(&self, id: FilterId, input: &[u8], output: &mut Vec<u8>) -> Result<ProcessStats> {
        let (src, dst) = {
            let arena = self.shared.arena.lock();
            let chain = arena
                .node(id)?
                .built
                .as_ref()
                .ok_or_else(|| Error::state(format!("filter {id:?} has not been built")))?;
            (chain.src, chain.dst)
        };
        let mut block = Block::decode(&src, input)?;
        let stats = self.process(id, &mut block)?;
        block.encode_into(&dst, output);
        Ok(stats)
    }

    /// Run every queued frame of `buffer` through `id` into a new buffer.
    ///
    /// The source buffer is not consumed and the node's own build is left alone.
    pub fn convert(&self, id: FilterId, buffer: &Buffer, dst: Option<&Format>) -> Result<Buffer> {
        let src = buffer.format();
        let mut chain = self.compile(id, &src, dst)?;
        let mut block = Block::decode(&src, &buffer.snapshot())?;
        chain.process(&mut block);

        let format = chain.dst_format();
        if block.is_empty() {
            return Buffer::new(format, 1, 1);
        }
        let mut bytes = Vec::with_capacity(block.frames() * format.block_align());
        block.encode_into(&format, &mut bytes);
        Buffer::from_bytes(format, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::{Encoding, FormatKind};

    fn mono() -> Format {
        Format::new(50, 1, Encoding::I16).unwrap()
    }

    fn scaled(graph: &FilterGraph, factor: f64) -> FilterId {
        let id = graph.create(FilterKind::Scale).unwrap();
        graph.set_params(id, &[FilterParams::Scale { factor }]).unwrap();
        id
    }

    #[test]
    fn chain_runs_children_in_append_order() {
        let graph = FilterGraph::new();
        let root = graph.create(FilterKind::Group).unwrap();
        let double = scaled(&graph, 2.0);
        let shift = graph.create(FilterKind::Offset).unwrap();
        graph.set_params(shift, &[FilterParams::Offset { value: 1.0 }]).unwrap();
        graph.append(root, double).unwrap();
        graph.append(root, shift).unwrap();
        assert_eq!(graph.children(root).unwrap(), vec![double, shift]);

        graph.build(root, &mono(), None).unwrap();
        let mut block = Block::from_interleaved(1, vec![10.0]);
        graph.process(root, &mut block).unwrap();
        assert_eq!(block.as_slice(), &[21.0]);
    }

    #[test]
    fn nested_groups_flatten_pre_order() {
        let graph = FilterGraph::new();
        let root = scaled(&graph, 3.0);
        let inner = graph.create(FilterKind::Group).unwrap();
        let shift = graph.create(FilterKind::Offset).unwrap();
        graph.set_params(shift, &[FilterParams::Offset { value: -1.0 }]).unwrap();
        graph.append(inner, shift).unwrap();
        graph.append(root, inner).unwrap();

        graph.build(root, &mono(), None).unwrap();
        let mut block = Block::from_interleaved(1, vec![2.0]);
        graph.process(root, &mut block).unwrap();
        assert_eq!(block.as_slice(), &[5.0]);
    }

    #[test]
    fn cycles_are_rejected() {
        let graph = FilterGraph::new();
        let a = graph.create(FilterKind::Group).unwrap();
        let b = graph.create(FilterKind::Group).unwrap();
        graph.append(a, b).unwrap();
        assert_eq!(graph.append(b, a).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(graph.append(a, a).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn remove_missing_child_fails() {
        let graph = FilterGraph::new();
        let a = graph.create(FilterKind::Group).unwrap();
        let b = graph.create(FilterKind::Group).unwrap();
        assert!(graph.remove(a, b).is_err());
        graph.append(a, b).unwrap();
        graph.remove(a, b).unwrap();
        assert!(graph.children(a).unwrap().is_empty());
    }

    #[test]
    fn mutation_after_build_is_stale() {
        let graph = FilterGraph::new();
        let root = graph.create(FilterKind::Group).unwrap();
        let s = scaled(&graph, 2.0);
        graph.append(root, s).unwrap();
        graph.build(root, &mono(), None).unwrap();
        assert!(graph.is_built(root));

        graph.set_params(s, &[FilterParams::Scale { factor: 4.0 }]).unwrap();
        let mut block = Block::from_interleaved(1, vec![1.0]);
        assert_eq!(graph.process(root, &mut block).unwrap_err(), Error::BuildStale(root));

        graph.build(root, &mono(), None).unwrap();
        graph.process(root, &mut block).unwrap();
        assert_eq!(block.as_slice(), &[4.0]);
    }

    #[test]
    fn bad_raw_params_leave_the_build_untouched() {
        let graph = FilterGraph::new();
        let s = scaled(&graph, 2.0);
        graph.build(s, &mono(), None).unwrap();

        let err = graph.set_params_raw(s, &[0u8; 8], 8, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(graph.is_built(s));

        let mut block = Block::from_interleaved(1, vec![3.0]);
        graph.process(s, &mut block).unwrap();
        assert_eq!(block.as_slice(), &[6.0]);
    }

    #[test]
    fn raw_params_round_trip_through_get() {
        let graph = FilterGraph::new();
        let limit = graph.create(FilterKind::Limit).unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(&(-100i32).to_le_bytes());
        raw.extend_from_slice(&100i32.to_le_bytes());
        graph.set_params_raw(limit, &raw, 8, 1).unwrap();
        assert_eq!(graph.get_params_raw(limit).unwrap(), (raw, 8));
    }

    #[test]
    fn params_must_match_kind() {
        let graph = FilterGraph::new();
        let s = graph.create(FilterKind::Scale).unwrap();
        assert!(graph.set_params(s, &[FilterParams::Offset { value: 1.0 }]).is_err());
        assert!(graph.set_params(s, &[]).is_err());
        assert!(graph.set_params(s, &[FilterParams::Scale { factor: 1.0 }; 9]).is_err());
        assert_eq!(graph.get_params(s).unwrap(), vec![FilterParams::Scale { factor: 1.0 }]);
    }

    #[test]
    fn delete_requires_detached_node() {
        let graph = FilterGraph::new();
        let a = graph.create(FilterKind::Group).unwrap();
        let b = graph.create(FilterKind::Group).unwrap();
        graph.append(a, b).unwrap();
        assert_eq!(graph.delete(b).unwrap_err().kind(), ErrorKind::State);
        graph.remove(a, b).unwrap();
        graph.delete(b).unwrap();
        assert!(!graph.contains(b));
    }

    #[test]
    fn build_with_destination_appends_an_adapter() {
        let graph = FilterGraph::new();
        let g = graph.create(FilterKind::Group).unwrap();
        let dst = Format::new(50, 6, Encoding::F32).unwrap();
        let resolved = graph.build(g, &Format::default(), Some(&dst)).unwrap();
        assert_eq!(resolved.channels(), 6);
        assert_eq!(resolved.encoding(), Encoding::F32);

        let mut out = Vec::new();
        let input: Vec<u8> = [16384i16, 0, -16384].iter().flat_map(|v| v.to_le_bytes()).collect();
        graph.process_bytes(g, &input, &mut out).unwrap();
        assert_eq!(out.len(), 24);
        assert_eq!(f32::from_le_bytes([out[0], out[1], out[2], out[3]]), 0.5);
    }

    #[test]
    fn convert_produces_a_new_buffer() {
        let graph = FilterGraph::new();
        let k = graph.create(FilterKind::Kinematics).unwrap();
        let src = Format::new(50, 3, Encoding::I16).unwrap();
        let buffer = Buffer::from_bytes(src, &[0u8; 12]).unwrap();
        let out = graph.convert(k, &buffer, None).unwrap();
        assert_eq!(out.format().kind(), FormatKind::Axis);
        assert_eq!(out.queued_samples(), 2);
        assert_eq!(buffer.queued_samples(), 2);
    }

    #[test]
    fn refresh_adopts_revision_when_unrelated_nodes_change() {
        let graph = FilterGraph::new();
        let s = scaled(&graph, 2.0);
        let mut chain = graph.compile(s, &mono(), None).unwrap();
        let _other = graph.create(FilterKind::Noise).unwrap();
        assert_eq!(graph.refresh(&mut chain, Duration::from_millis(1)), Some(true));
        graph.set_params(s, &[FilterParams::Scale { factor: 3.0 }]).unwrap();
        assert_eq!(graph.refresh(&mut chain, Duration::from_millis(1)), Some(false));
    }

    #[test]
    fn passthrough_only_adapts() {
        let src = Format::new(50, 2, Encoding::I16).unwrap();
        let dst = Format::new(50, 3, Encoding::I16).unwrap();
        let mut chain = FilterChain::passthrough(&src, &dst);
        assert_eq!(chain.root(), None);
        assert_eq!(chain.dst_format(), dst);
        let mut block = Block::from_interleaved(2, vec![1.0, 2.0]);
        chain.process(&mut block);
        assert_eq!(block.as_slice(), &[1.0, 2.0, 0.0]);
    }
}
