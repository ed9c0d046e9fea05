//! Graph execution: wavefront scheduling, retrieval, and the join fold.
//!
//! Execution runs in two phases. Retrieval processes nodes in wavefronts:
//! the first wave is every node whose template is independent, and a node
//! with dependent parameters joins the wave after its parent's frame is
//! post-manipulated and available. Wave members run concurrently; results
//! land in per-node write-once slots, and no graph-wide lock is held across a
//! connector call. The fold phase then walks nodes in reverse topological
//! order, merging each child's frame into its parent; the root's frame is the
//! final result.

use crate::error::{Error, GraphConfigError, Stage, TemplateError};
use crate::expr::Evaluator;
use crate::graph::{NodeId, QueryGraph};
use crate::types::{Frame, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::trace;

/// A graph-wide cancellation signal, shareable across threads.
///
/// Cancelling drops all pending wavefronts; in-flight connector calls are
/// abandoned on a best-effort basis (the scheduler re-checks the token at
/// every stage boundary).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Options for one execution cycle.
#[derive(Clone, Debug)]
pub struct ExecutionOptions {
    /// Run wavefront members concurrently (the default).
    pub parallel: bool,
    /// Abort with `DeadlineExceeded` once this instant passes.
    pub deadline: Option<Instant>,
    /// External cancellation signal.
    pub cancel: Option<CancelToken>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            deadline: None,
            cancel: None,
        }
    }
}

impl ExecutionOptions {
    pub fn parallel() -> Self {
        Self::default()
    }

    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Executes the graph with default options, returning the folded root frame.
pub fn execute(graph: &mut QueryGraph, params: &HashMap<String, Value>) -> Result<Frame, Error> {
    execute_with(graph, params, ExecutionOptions::default())
}

/// Executes the graph, returning the folded root frame.
///
/// After a successful cycle every node carries `executed = true` and its
/// frame; non-leaf frames already contain their folded children.
pub fn execute_with(
    graph: &mut QueryGraph,
    params: &HashMap<String, Value>,
    options: ExecutionOptions,
) -> Result<Frame, Error> {
    let root = graph.root_id().ok_or(GraphConfigError::NoRoot)?;
    graph.reset_execution_state();
    validate(graph, params)?;

    let topo = graph.topological_order();
    let waves = plan_waves(graph, &topo);
    let evaluator = Evaluator::new();
    let slots: Vec<OnceLock<Frame>> = (0..graph.len()).map(|_| OnceLock::new()).collect();
    let failed = AtomicBool::new(false);

    let ctx = RunContext {
        graph,
        params,
        evaluator: &evaluator,
        slots: &slots,
        failed: &failed,
        deadline: options.deadline,
        cancel: options.cancel.clone(),
    };

    for (index, wave) in waves.iter().enumerate() {
        #[cfg(feature = "tracing")]
        trace!(wave = index, nodes = wave.len(), "executing wavefront");
        #[cfg(not(feature = "tracing"))]
        let _ = index;

        if options.parallel {
            run_wave_parallel(&ctx, wave)?;
        } else {
            for &id in wave {
                run_node(&ctx, id)?;
            }
        }
    }

    fold(graph, &topo, root, slots)
}

struct RunContext<'a> {
    graph: &'a QueryGraph,
    params: &'a HashMap<String, Value>,
    evaluator: &'a Evaluator,
    slots: &'a [OnceLock<Frame>],
    failed: &'a AtomicBool,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl RunContext<'_> {
    fn check_interrupted(&self) -> Result<(), Error> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// Pre-flight checks: every referenced independent parameter is supplied, and
/// every node with dependent parameters actually has a parent to draw from.
fn validate(graph: &QueryGraph, params: &HashMap<String, Value>) -> Result<(), Error> {
    for &id in &graph.topological_order() {
        let node = graph.get(id);
        for name in node.template.independent_parameter_names() {
            if !params.contains_key(name) {
                return Err(Error::at_node(
                    &node.name,
                    Stage::Render,
                    TemplateError::IndependentParameter(name.to_string()),
                ));
            }
        }
        if node.parent().is_none() {
            if let Some(first) = node.template.dependent_parameter_names().first() {
                return Err(Error::at_node(
                    &node.name,
                    Stage::Render,
                    TemplateError::DependentParameter {
                        name: (*first).to_string(),
                        reason: "node has no parent".to_string(),
                    },
                ));
            }
        }
    }
    Ok(())
}

/// Static wavefront assignment: independent templates run in wave zero, a
/// dependent node runs one wave after its parent. Waves preserve topological
/// order internally.
fn plan_waves(graph: &QueryGraph, topo: &[NodeId]) -> Vec<Vec<NodeId>> {
    let mut wave_of = vec![0usize; graph.len()];
    let mut waves: Vec<Vec<NodeId>> = Vec::new();
    for &id in topo {
        let node = graph.get(id);
        let wave = match (node.is_independent(), node.parent()) {
            (true, _) | (false, None) => 0,
            (false, Some(parent)) => wave_of[parent] + 1,
        };
        wave_of[id] = wave;
        if waves.len() <= wave {
            waves.resize_with(wave + 1, Vec::new);
        }
        waves[wave].push(id);
    }
    waves
}

#[cfg(feature = "parallel")]
fn run_wave_parallel(ctx: &RunContext<'_>, wave: &[NodeId]) -> Result<(), Error> {
    use rayon::prelude::*;

    if wave.len() == 1 {
        return run_node(ctx, wave[0]);
    }
    let results: Vec<Result<(), Error>> =
        wave.par_iter().map(|&id| run_node(ctx, id)).collect();
    pick_wave_error(results)
}

#[cfg(not(feature = "parallel"))]
fn run_wave_parallel(ctx: &RunContext<'_>, wave: &[NodeId]) -> Result<(), Error> {
    for &id in wave {
        run_node(ctx, id)?;
    }
    Ok(())
}

/// Reports the first substantive failure of a wave; bail-outs caused by a
/// sibling's failure never mask the failure itself.
#[cfg(feature = "parallel")]
fn pick_wave_error(results: Vec<Result<(), Error>>) -> Result<(), Error> {
    let mut first: Option<Error> = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                if first.is_none() {
                    first = Some(Error::Cancelled);
                }
            }
            Err(other) => match first {
                Some(Error::Cancelled) | None => first = Some(other),
                Some(_) => {}
            },
        }
    }
    match first {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Renders, retrieves and manipulates one node, storing its frame.
fn run_node(ctx: &RunContext<'_>, id: NodeId) -> Result<(), Error> {
    let node = ctx.graph.get(id);
    let fail = |err: Error| {
        ctx.failed.store(true, Ordering::Relaxed);
        err
    };

    ctx.check_interrupted().map_err(fail)?;

    let parent_frame = node.parent().and_then(|parent| ctx.slots[parent].get());
    let query = node
        .template
        .render(node.connector().kind(), ctx.params, parent_frame)
        .map_err(|e| fail(Error::at_node(&node.name, Stage::Render, e)))?;

    #[cfg(feature = "tracing")]
    trace!(node = %node.name, connection = node.connector().name(), "rendered query");

    ctx.check_interrupted().map_err(fail)?;
    let frame = node
        .connector()
        .execute_query(&query)
        .map_err(|e| fail(Error::at_node(&node.name, Stage::Retrieve, e)))?;

    let frame = if node.fields.is_empty() {
        frame
    } else {
        frame
            .select(&node.fields)
            .map_err(|e| fail(Error::at_node(&node.name, Stage::Retrieve, Error::Frame(e))))?
    };

    ctx.check_interrupted().map_err(fail)?;
    let frame = node
        .manipulations
        .apply(frame, ctx.evaluator)
        .map_err(|e| fail(Error::at_node(&node.name, Stage::Manipulate, e)))?;

    let _ = ctx.slots[id].set(frame);
    Ok(())
}

/// Reverse-topological join fold. Each child merges into its parent's current
/// frame; sibling order is fixed by the reversal of the retrieval order.
fn fold(
    graph: &mut QueryGraph,
    topo: &[NodeId],
    root: NodeId,
    slots: Vec<OnceLock<Frame>>,
) -> Result<Frame, Error> {
    let mut frames: Vec<Option<Frame>> = slots.into_iter().map(OnceLock::into_inner).collect();

    for &id in topo.iter().rev() {
        let Some(parent) = graph.get(id).parent() else {
            continue;
        };
        let node = graph.get(id);
        let child_frame = frames[id]
            .clone()
            .expect("executed node has a frame");
        let parent_frame = frames[parent]
            .take()
            .expect("executed node has a frame");
        #[cfg(feature = "tracing")]
        trace!(child = %node.name, "folding into parent");
        let merged = parent_frame
            .merge(&child_frame, node.join.kind, &node.join.pairs)
            .map_err(|e| Error::at_node(&node.name, Stage::Fold, Error::Frame(e)))?;
        frames[parent] = Some(merged);
    }

    for &id in topo {
        let node = graph.get_mut(id);
        node.frame = frames[id].take();
        node.executed = true;
    }
    let result = graph
        .get(root)
        .frame
        .clone()
        .expect("root frame is populated after fold");
    Ok(result)
}
