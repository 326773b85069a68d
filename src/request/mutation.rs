//! `MutationRequest` — argument-in/value-out operations (`spec.md` §4.1).
//!
//! Like [`crate::request::paginated::PaginatedRequest`], a type implements
//! this trait directly and the store wraps it in [`MutationAdapter`] to
//! get a concrete [`Request`] whose `run` reads the arguments the store
//! installed in the context before scheduling.

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::request::Request;
use crate::task::Isolation;
use async_trait::async_trait;
use std::marker::PhantomData;

struct ArgumentsKey<A>(PhantomData<A>);

impl<A: Clone + Send + Sync + 'static> ContextKey for ArgumentsKey<A> {
    type Value = Option<A>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Install the arguments a `mutate()` run should execute with.
pub fn with_arguments<A: Clone + Send + Sync + 'static>(context: &mut Context, arguments: A) {
    context.set::<ArgumentsKey<A>>(Some(arguments));
}

/// Read back the arguments installed by [`with_arguments`]. Panics if
/// none were set — the store is responsible for always installing them
/// before scheduling a mutation task; a missing value indicates a bug in
/// the store, not caller misuse.
pub fn arguments<A: Clone + Send + Sync + 'static>(context: &Context) -> A {
    context
        .get::<ArgumentsKey<A>>()
        .expect("mutation task scheduled without arguments installed in its context")
}

/// The argument-in/value-out specialization.
#[async_trait]
pub trait MutationRequest: Send + Sync + 'static {
    /// The input to a single invocation.
    type Arguments: Clone + Send + Sync + 'static;
    /// The success type.
    type Value: Clone + Send + Sync + 'static;
    /// The failure type.
    type Failure: Clone + Send + Sync + 'static;

    /// Idempotent per-store context preparation.
    fn setup(&self, _context: &mut Context) {}

    /// Execute one invocation.
    async fn mutate(
        &self,
        arguments: Self::Arguments,
        context: &Context,
        continuation: &Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure>;
}

/// Adapts a [`MutationRequest`] into a concrete [`Request`].
pub struct MutationAdapter<R>(pub R);

#[async_trait]
impl<R: MutationRequest> Request for MutationAdapter<R> {
    type Value = R::Value;
    type Failure = R::Failure;

    fn setup(&self, context: &mut Context) {
        self.0.setup(context);
    }

    async fn run(
        &self,
        isolation: Isolation,
        context: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let args = arguments::<R::Arguments>(&context);
        let _ = &isolation;
        self.0.mutate(args, &context, &continuation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    struct Echo;

    #[async_trait]
    impl MutationRequest for Echo {
        type Arguments = i32;
        type Value = i32;
        type Failure = String;

        async fn mutate(
            &self,
            arguments: i32,
            _context: &Context,
            _continuation: &Continuation<i32, String>,
        ) -> Result<i32, String> {
            if arguments < 0 {
                Err("negative".to_string())
            } else {
                Ok(arguments * 2)
            }
        }
    }

    #[tokio::test]
    async fn run_reads_installed_arguments() {
        let adapter = MutationAdapter(Echo);
        let mut ctx = Context::new();
        with_arguments(&mut ctx, 21);
        let isolation = crate::task::Task::<i32, String>::new(
            crate::task::TaskConfig::new(ctx.clone()),
            vec![],
        )
        .isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = adapter.run(isolation, ctx, cont).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn propagates_failure_without_wrapping() {
        let adapter = MutationAdapter(Echo);
        let mut ctx = Context::new();
        with_arguments(&mut ctx, -1);
        let isolation = crate::task::Task::<i32, String>::new(
            crate::task::TaskConfig::new(ctx.clone()),
            vec![],
        )
        .isolation();
        let cont = Continuation::new(ctx.clone(), |_, _, _| {});
        let result = adapter.run(isolation, ctx, cont).await;
        assert_eq!(result, Err("negative".to_string()));
    }
}
