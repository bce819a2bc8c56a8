//! Composite stages: sequential chains, parallel fan-out/fan-in, and routers.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, instrument, warn};

use super::session::SessionState;
use super::stage::{Outcome, SharedStage, Stage, StageError};

/// Runs stages in order, feeding each one the previous stage's output.
///
/// The chain ends at the first terminal stage or after the last stage. A
/// stage with no contribution leaves the running input unchanged.
pub struct Sequential {
    name: String,
    stages: Vec<SharedStage>,
}

impl Sequential {
    pub fn new(name: impl Into<String>, stages: Vec<SharedStage>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    pub fn stages(&self) -> &[SharedStage] {
        &self.stages
    }
}

#[async_trait]
impl Stage for Sequential {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(composite = %self.name))]
    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError> {
        let mut current = input.to_string();

        for (idx, stage) in self.stages.iter().enumerate() {
            debug!(stage = stage.name(), idx, "Running sequential stage");

            match stage.run(&current, state).await? {
                Outcome::Output(text) => current = text,
                Outcome::NoContribution => {
                    debug!(stage = stage.name(), "Stage had no contribution");
                }
                outcome @ Outcome::Final { .. } => return Ok(outcome),
            }
        }

        Ok(Outcome::Output(current))
    }
}

/// Runs every branch concurrently on the same input and waits for all.
///
/// Each branch runs as its own tokio task. A branch that fails, escalates,
/// or panics contributes nothing instead of failing its siblings. Every
/// branch ends up with a session slot: its `output_key`, or its name.
///
/// The fan-in output joins contributions in declared branch order, so it
/// does not depend on which branch finishes first.
pub struct Parallel {
    name: String,
    branches: Vec<SharedStage>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, branches: Vec<SharedStage>) -> Self {
        Self {
            name: name.into(),
            branches,
        }
    }

    pub fn branches(&self) -> &[SharedStage] {
        &self.branches
    }
}

#[async_trait]
impl Stage for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(composite = %self.name, branches = self.branches.len()))]
    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError> {
        let handles: Vec<_> = self
            .branches
            .iter()
            .map(|branch| {
                let branch = Arc::clone(branch);
                let state = Arc::clone(state);
                let input = input.to_string();
                tokio::spawn(async move { branch.run(&input, &state).await })
            })
            .collect();
        let _guard = AbortOnDrop::new(&handles);

        let mut contributions = Vec::with_capacity(handles.len());
        let mut terminal: Option<Outcome> = None;

        for (branch, handle) in self.branches.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(branch = branch.name(), error = %e, "Parallel branch degraded to no contribution");
                    self.publish_degraded(branch, state);
                    continue;
                }
                Err(e) => {
                    warn!(branch = branch.name(), error = %e, "Parallel branch panicked; no contribution");
                    self.publish_degraded(branch, state);
                    continue;
                }
            };

            // Branches with their own output key have already published
            if branch.output_key().is_none() {
                state.append(branch.name(), outcome.contribution().unwrap_or_default());
            }

            if let Some(text) = outcome.contribution() {
                if !text.is_empty() {
                    contributions.push(text.to_string());
                }
            }

            if outcome.is_final() && terminal.is_none() {
                terminal = Some(outcome);
            }
        }

        if let Some(outcome) = terminal {
            return Ok(outcome);
        }

        if contributions.is_empty() {
            Ok(Outcome::NoContribution)
        } else {
            Ok(Outcome::Output(contributions.join("\n")))
        }
    }
}

/// Aborts branch tasks still running when the fan-in future is dropped
struct AbortOnDrop(Vec<AbortHandle>);

impl AbortOnDrop {
    fn new<T>(handles: &[JoinHandle<T>]) -> Self {
        Self(handles.iter().map(JoinHandle::abort_handle).collect())
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl Parallel {
    fn publish_degraded(&self, branch: &SharedStage, state: &SessionState) {
        let slot = branch.output_key().unwrap_or_else(|| branch.name());
        state.append(slot, "");
    }
}

/// Delegates the input to one of several routes.
///
/// A classifier stage names the route; unknown names fall back to the
/// default route. The chosen route receives the router's original input,
/// not the classifier's output.
pub struct Router {
    name: String,
    classifier: SharedStage,
    routes: Vec<SharedStage>,
    default_route: usize,
}

impl Router {
    pub fn new(
        name: impl Into<String>,
        classifier: SharedStage,
        routes: Vec<SharedStage>,
        default_route: &str,
    ) -> Result<Self> {
        let name = name.into();
        if routes.is_empty() {
            anyhow::bail!("Router '{}' must have at least one route", name);
        }

        let default_idx = routes
            .iter()
            .position(|r| r.name() == default_route)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Router '{}' default route '{}' is not one of its routes",
                    name,
                    default_route
                )
            })?;

        Ok(Self {
            name,
            classifier,
            routes,
            default_route: default_idx,
        })
    }

    /// Pick the route named by classifier output
    pub fn select(&self, choice: Option<&str>) -> &SharedStage {
        choice
            .map(str::trim)
            .and_then(|wanted| self.routes.iter().find(|r| r.name().eq_ignore_ascii_case(wanted)))
            .unwrap_or(&self.routes[self.default_route])
    }
}

#[async_trait]
impl Stage for Router {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(router = %self.name))]
    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError> {
        let choice = self.classifier.run(input, state).await?;
        let route = self.select(choice.contribution());

        debug!(route = route.name(), "Delegating to route");
        route.run(input, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::FnStage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn session() -> Arc<SessionState> {
        Arc::new(SessionState::new("test"))
    }

    #[tokio::test]
    async fn test_sequential_chains_outputs() {
        let seq = Sequential::new(
            "chain",
            vec![
                FnStage::new("upper", |i, _| async move { Ok(i.to_uppercase()) }).shared(),
                FnStage::new("wrap", |i, _| async move { Ok(format!("[{}]", i)) }).shared(),
            ],
        );

        let outcome = seq.run("abc", &session()).await.unwrap();
        assert_eq!(outcome, Outcome::Output("[ABC]".to_string()));
    }

    #[tokio::test]
    async fn test_sequential_stops_at_terminal() {
        let seq = Sequential::new(
            "chain",
            vec![
                FnStage::constant("first", "done").terminal().shared(),
                FnStage::new("never", |_, _| async move {
                    Err(StageError::failed("never", "should not run"))
                })
                .shared(),
            ],
        );

        let outcome = seq.run("x", &session()).await.unwrap();
        assert!(outcome.is_final());
        assert_eq!(outcome.contribution(), Some("done"));
    }

    #[tokio::test]
    async fn test_sequential_skips_no_contribution() {
        let seq = Sequential::new(
            "chain",
            vec![
                FnStage::constant("silent", "NO_CONTRIBUTION").shared(),
                FnStage::new("echo", |i, _| async move { Ok(i) }).shared(),
            ],
        );

        let outcome = seq.run("original", &session()).await.unwrap();
        assert_eq!(outcome, Outcome::Output("original".to_string()));
    }

    #[tokio::test]
    async fn test_sequential_propagates_escalation() {
        let seq = Sequential::new(
            "chain",
            vec![FnStage::constant("saver", "ESCALATE: nope").shared()],
        );

        let err = seq.run("x", &session()).await.unwrap_err();
        assert_eq!(err.stage(), "saver");
    }

    #[tokio::test]
    async fn test_parallel_degrades_failed_branch() {
        let state = session();
        let par = Parallel::new(
            "fan",
            vec![
                FnStage::constant("ok", "A").with_output_key("ok_out").shared(),
                FnStage::new("broken", |_, _| async move {
                    Err(StageError::failed("broken", "adapter down"))
                })
                .with_output_key("broken_out")
                .shared(),
                FnStage::new("panics", |_, _| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok(String::new())
                })
                .shared(),
            ],
        );

        let outcome = par.run("x", &state).await.unwrap();
        assert_eq!(outcome, Outcome::Output("A".to_string()));
        assert_eq!(state.get("ok_out").as_deref(), Some("A"));
        assert_eq!(state.get("broken_out").as_deref(), Some(""));
        assert_eq!(state.get("panics").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_parallel_publishes_under_name_without_output_key() {
        let state = session();
        let par = Parallel::new("fan", vec![FnStage::constant("facts", "cats purr").shared()]);

        par.run("x", &state).await.unwrap();
        assert_eq!(state.get("facts").as_deref(), Some("cats purr"));
    }

    #[tokio::test]
    async fn test_parallel_all_silent_is_no_contribution() {
        let par = Parallel::new(
            "fan",
            vec![
                FnStage::constant("a", "NO_CONTRIBUTION").shared(),
                FnStage::constant("b", "NO_ADD_BUTTON").with_skip_token("NO_ADD_BUTTON").shared(),
            ],
        );

        assert_eq!(par.run("x", &session()).await.unwrap(), Outcome::NoContribution);
    }

    #[tokio::test]
    async fn test_parallel_order_is_declared_order() {
        let slow_first = Parallel::new(
            "fan",
            vec![
                FnStage::new("a", |_, _| async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok("A".to_string())
                })
                .shared(),
                FnStage::constant("b", "B").shared(),
            ],
        );

        let outcome = slow_first.run("x", &session()).await.unwrap();
        assert_eq!(outcome, Outcome::Output("A\nB".to_string()));
    }

    #[tokio::test]
    async fn test_parallel_first_declared_final_wins() {
        let state = session();
        let par = Parallel::new(
            "fan",
            vec![
                FnStage::new("slow_page", |_, _| async move {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok("slow".to_string())
                })
                .terminal()
                .shared(),
                FnStage::constant("notes", "side note").shared(),
                FnStage::constant("fast_page", "fast").terminal().shared(),
            ],
        );

        let outcome = par.run("x", &state).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Final {
                stage: "slow_page".to_string(),
                content: "slow".to_string()
            }
        );
        // Every branch still got its slot
        assert_eq!(state.get("notes").as_deref(), Some("side note"));
        assert_eq!(state.get("fast_page").as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn test_cancelled_parallel_stops_branches() {
        let effects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&effects);
        let chain = Sequential::new(
            "chain",
            vec![
                Arc::new(Parallel::new(
                    "fan",
                    vec![FnStage::new("slow", move |_, _| {
                        let counter = Arc::clone(&counter);
                        async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok("late".to_string())
                        }
                    })
                    .shared()],
                )) as SharedStage,
                FnStage::constant("page", "done").terminal().shared(),
            ],
        );

        let state = session();
        let result = tokio::time::timeout(Duration::from_millis(20), chain.run("x", &state)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(effects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_router_selects_named_route() {
        let router = Router::new(
            "root",
            FnStage::constant("classifier", "component_page\n").shared(),
            vec![
                FnStage::constant("main_page", "main").terminal().shared(),
                FnStage::new("component_page", |i, _| async move { Ok(format!("component for {}", i)) })
                    .terminal()
                    .shared(),
            ],
            "main_page",
        )
        .unwrap();

        let outcome = router.run("a fun fact", &session()).await.unwrap();
        assert_eq!(outcome.contribution(), Some("component for a fun fact"));
    }

    #[tokio::test]
    async fn test_router_falls_back_to_default() {
        let router = Router::new(
            "root",
            FnStage::constant("classifier", "something_else").shared(),
            vec![FnStage::constant("main_page", "main").terminal().shared()],
            "main_page",
        )
        .unwrap();

        let outcome = router.run("x", &session()).await.unwrap();
        assert_eq!(outcome.contribution(), Some("main"));
    }

    #[test]
    fn test_router_rejects_unknown_default() {
        let result = Router::new(
            "root",
            FnStage::constant("classifier", "x").shared(),
            vec![FnStage::constant("main_page", "main").shared()],
            "missing",
        );
        assert!(result.is_err());
    }
}
