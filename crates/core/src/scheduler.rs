//! Concurrent test scheduler
//!
//! Runs a batch of test cases under a global concurrency cap and a per
//! protocol cap. Results come back in input order regardless of completion
//! order, and a failure inside one case never aborts the batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::assertion::{extract_variables, get_assertion_summary, run_assertions};
use crate::error::{Error, Result};
use crate::lifecycle::{execute_actions, LifecycleConfig, LifecycleContext, Scope};
use crate::registry::{ProtocolRegistry, RunnerOptions, TestRunner};
use crate::types::{AssertionResult, ResponseEnvelope, ScheduleResult, Summary, TestCase, TestResult};
use crate::variables::substitute;

/// Default global concurrency
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default concurrency per protocol
pub const DEFAULT_CONCURRENCY_PER_TYPE: usize = 3;

/// Options for one scheduled batch
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub concurrency: usize,
    pub concurrency_per_type: usize,
    pub runner_options: RunnerOptions,
    /// Highest-precedence variables, re-applied at execution time
    pub params: Map<String, Value>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            concurrency_per_type: DEFAULT_CONCURRENCY_PER_TYPE,
            runner_options: RunnerOptions::default(),
            params: Map::new(),
        }
    }
}

/// Values extracted during one run, shared by every case in it.
/// Concurrent writes to the same key resolve last-write-wins in completion
/// order.
#[derive(Debug, Clone, Default)]
pub struct ExtractedStore {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl ExtractedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().clone()
    }

    pub fn merge(&self, values: &Map<String, Value>) {
        if values.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for (k, v) in values {
            inner.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Results of one protocol within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolGroup {
    /// Positions of this protocol's results in the batch
    pub indices: Vec<usize>,
    pub summary: Summary,
}

/// A batch result with per-protocol summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedScheduleResult {
    #[serde(flatten)]
    pub result: ScheduleResult,
    pub by_protocol: BTreeMap<String, ProtocolGroup>,
}

struct ProtocolLane {
    permits: Arc<Semaphore>,
    runner: std::result::Result<Arc<dyn TestRunner>, String>,
}

/// Runs test cases through the protocol registry
pub struct Scheduler {
    registry: Arc<ProtocolRegistry>,
}

impl Scheduler {
    pub fn new(registry: Arc<ProtocolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// Run `cases` with a fresh extracted-variable store
    pub async fn schedule(&self, cases: Vec<TestCase>, options: &ScheduleOptions) -> ScheduleResult {
        self.schedule_with_store(cases, options, ExtractedStore::new()).await
    }

    /// Run `cases` sharing `store`. Results follow input order.
    pub async fn schedule_with_store(
        &self,
        cases: Vec<TestCase>,
        options: &ScheduleOptions,
        store: ExtractedStore,
    ) -> ScheduleResult {
        let start = Instant::now();
        let total = cases.len();
        info!(
            "Scheduling {} test case(s) (concurrency {}, per protocol {})",
            total, options.concurrency, options.concurrency_per_type
        );

        let global = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut lanes: HashMap<String, ProtocolLane> = HashMap::new();
        for case in &cases {
            let protocol = case.protocol_name().to_string();
            lanes.entry(protocol.clone()).or_insert_with(|| {
                let runner = match &case.protocol {
                    Some(name) => self.registry.create(name, &options.runner_options),
                    None => Err(Error::MissingProtocol(case.id.clone())),
                };
                if let Err(e) = &runner {
                    warn!("Cannot create runner for {}: {}", protocol, e);
                }
                ProtocolLane {
                    permits: Arc::new(Semaphore::new(options.concurrency_per_type.max(1))),
                    runner: runner.map_err(|e| e.to_string()),
                }
            });
        }

        let mut fallbacks = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);
        for case in cases {
            let Some(lane) = lanes.get(case.protocol_name()) else {
                continue;
            };
            let lane_permits = lane.permits.clone();
            let runner = lane.runner.clone();
            let global = global.clone();
            let store = store.clone();
            let params = options.params.clone();
            fallbacks.push(case.clone());

            handles.push(tokio::spawn(async move {
                let _lane_permit = lane_permits.acquire_owned().await;
                let _global_permit = global.acquire_owned().await;
                let case_start = Instant::now();

                let result = match runner {
                    Ok(runner) => match execute_case(&case, runner.as_ref(), &store, &params).await {
                        Ok(result) => result,
                        Err(e) => TestResult::failed(&case, e, case_start.elapsed().as_millis() as u64),
                    },
                    Err(reason) => TestResult::failed(&case, reason, 0),
                };

                if result.passed {
                    info!("✓ {} ({}ms)", result.id, result.duration_ms);
                } else {
                    warn!("✗ {} ({}ms)", result.id, result.duration_ms);
                }
                result
            }));
        }

        let results: Vec<TestResult> = join_all(handles)
            .await
            .into_iter()
            .zip(fallbacks.iter())
            .map(|(joined, case)| joined.unwrap_or_else(|e| TestResult::failed(case, format!("task failed: {}", e), 0)))
            .collect();

        let result = ScheduleResult::from_results(results, start.elapsed().as_millis() as u64);
        info!(
            "Completed {} test case(s): {} passed, {} failed in {}ms",
            result.summary.total, result.summary.passed, result.summary.failed, result.duration_ms
        );
        result
    }

    /// Run `cases` and additionally summarise results per protocol
    pub async fn schedule_by_type(&self, cases: Vec<TestCase>, options: &ScheduleOptions) -> TypedScheduleResult {
        let result = self.schedule(cases, options).await;
        let mut by_protocol: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, r) in result.results.iter().enumerate() {
            let protocol = r.protocol.clone().unwrap_or_else(|| "unknown".to_string());
            by_protocol.entry(protocol).or_default().push(idx);
        }
        let by_protocol = by_protocol
            .into_iter()
            .map(|(protocol, indices)| {
                let summary = Summary::tally(indices.iter().map(|i| result.results[*i].passed));
                (protocol, ProtocolGroup { indices, summary })
            })
            .collect();
        TypedScheduleResult { result, by_protocol }
    }
}

/// Execute one case through its lifecycle. Once `setup(test)` has run,
/// `teardown(test)` runs on every path; the first error is returned.
pub async fn execute_case(
    case: &TestCase,
    runner: &dyn TestRunner,
    store: &ExtractedStore,
    params: &Map<String, Value>,
) -> Result<TestResult> {
    let start = Instant::now();
    let lifecycle = match &case.lifecycle {
        Some(raw) => LifecycleConfig::from_value(raw)?,
        None => LifecycleConfig::default(),
    };
    let mut ctx = LifecycleContext::new(case.variables.clone(), store.snapshot()).with_params(params.clone());

    execute_actions(&lifecycle.setup, Scope::Test, &mut ctx).await?;

    let mut case_extracted = Map::new();
    let phases = run_phases(case, runner, store, &lifecycle, &mut ctx, &mut case_extracted).await;
    let cleanup = execute_actions(&lifecycle.teardown, Scope::Test, &mut ctx).await;

    let lifecycle_extracted: Map<String, Value> = ctx
        .extracted
        .iter()
        .filter(|(k, v)| !case_extracted.contains_key(*k) && store.get(k).as_ref() != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    store.merge(&lifecycle_extracted);
    case_extracted.extend(lifecycle_extracted);

    let (envelope, outcome) = match (phases, cleanup) {
        (Ok(done), Ok(())) => done,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), cleanup) => {
            if let Err(cleanup_err) = cleanup {
                warn!("teardown for {} failed: {}", case.id, cleanup_err);
            }
            return Err(e);
        }
    };

    let assertions = outcome?;
    let summary = get_assertion_summary(&assertions);
    Ok(TestResult {
        id: case.id.clone(),
        description: case.description.clone(),
        protocol: case.protocol.clone(),
        passed: summary.all_passed(),
        assertions,
        summary,
        error: envelope.error.clone(),
        response: Some(envelope),
        duration_ms: start.elapsed().as_millis() as u64,
        extracted: case_extracted,
        data_row_index: case.data_row.as_ref().map(|r| r.index),
    })
}

/// setup(run), request, extraction, teardown(run/assert), assertions
async fn run_phases(
    case: &TestCase,
    runner: &dyn TestRunner,
    store: &ExtractedStore,
    lifecycle: &LifecycleConfig,
    ctx: &mut LifecycleContext,
    case_extracted: &mut Map<String, Value>,
) -> Result<(ResponseEnvelope, Result<Vec<AssertionResult>>)> {
    execute_actions(&lifecycle.setup, Scope::Run, ctx).await?;

    let mut resolved = case.clone();
    resolved.request = substitute(&case.request, &ctx.variable_context());
    debug!("Executing {} via {}", case.id, runner.protocol());
    let envelope = runner.execute(&resolved).await?;
    ctx.response = Some(envelope.clone());

    let extracted = extract_variables(&envelope, &case.extract)?;
    store.merge(&extracted);
    case_extracted.extend(extracted.clone());
    ctx.extracted.extend(extracted);

    execute_actions(&lifecycle.teardown, Scope::Run, ctx).await?;
    execute_actions(&lifecycle.teardown, Scope::Assert, ctx).await?;

    let vars = ctx.variable_context();
    let assertions: Vec<Value> = case.assertions.iter().map(|a| substitute(a, &vars)).collect();
    let outcome = run_assertions(&envelope, &assertions, Some(&case.base_dir));
    Ok((envelope, outcome))
}
