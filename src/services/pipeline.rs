use crate::services::error::IntakeError;
use std::future::Future;
use std::pin::Pin;

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<(), IntakeError>> + Send + 'a>>;

/// A named step that reads the shared context
pub struct Stage<C> {
    pub name: &'static str,
    run: for<'a> fn(&'a C) -> StageFuture<'a>,
}

/// Failure of one stage; later stages did not run
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: IntakeError,
}

/// Ordered list of fallible stages executed until the first failure
pub struct Pipeline<C> {
    stages: Vec<Stage<C>>,
}

impl<C: Sync> Pipeline<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, name: &'static str, run: for<'a> fn(&'a C) -> StageFuture<'a>) -> Self {
        self.stages.push(Stage { name, run });
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub async fn run(&self, ctx: &C) -> Result<(), StageFailure> {
        for stage in &self.stages {
            tracing::debug!("Running stage {}", stage.name);
            (stage.run)(ctx).await.map_err(|error| StageFailure {
                stage: stage.name,
                error,
            })?;
        }
        Ok(())
    }
}

impl<C: Sync> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Trace {
        visited: Mutex<Vec<&'static str>>,
    }

    fn first(ctx: &Trace) -> StageFuture<'_> {
        Box::pin(async move {
            ctx.visited.lock().unwrap().push("first");
            Ok(())
        })
    }

    fn failing(ctx: &Trace) -> StageFuture<'_> {
        Box::pin(async move {
            ctx.visited.lock().unwrap().push("failing");
            Err(IntakeError::NoInput)
        })
    }

    fn never(ctx: &Trace) -> StageFuture<'_> {
        Box::pin(async move {
            ctx.visited.lock().unwrap().push("never");
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let trace = Trace::default();
        let pipeline = Pipeline::<Trace>::new().stage("first", first).stage("again", first);

        pipeline.run(&trace).await.unwrap();
        assert_eq!(*trace.visited.lock().unwrap(), vec!["first", "first"]);
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let trace = Trace::default();
        let pipeline = Pipeline::<Trace>::new()
            .stage("first", first)
            .stage("failing", failing)
            .stage("never", never);

        let failure = pipeline.run(&trace).await.unwrap_err();
        assert_eq!(failure.stage, "failing");
        assert!(matches!(failure.error, IntakeError::NoInput));
        assert_eq!(*trace.visited.lock().unwrap(), vec!["first", "failing"]);
    }
}
