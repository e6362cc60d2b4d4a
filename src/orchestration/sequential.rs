//! Sequential pipeline agent
//!
//! Configured with an ordered list of agent names. An inbound envelope
//! is sent to the first name, the reply forwarded to the second, and so
//! on; the last reply goes back to the caller. Any step failing or
//! timing out aborts the pipeline and surfaces the error; no
//! compensation is performed.

use async_trait::async_trait;

use crate::agent::{Agent, AgentContext, Reply};
use crate::core::{keys, Address, Envelope, FabricResult};
use crate::runtime::AgentSpec;

/// Composite agent that runs its children one after another
pub struct Sequential {
    steps: Vec<String>,
}

impl Sequential {
    /// Create a pipeline over the given agent names, in order
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// Registration spec for a pipeline under `name`
    pub fn spec<I, S>(name: impl Into<String>, steps: I) -> AgentSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
        AgentSpec::new(name, move || Box::new(Sequential::new(steps.clone())))
    }
}

/// Strip delivery headers so a reply can be forwarded as the next input
fn clean_for_forward(mut env: Envelope) -> Envelope {
    env.header.clear_reply_to();
    env.header.clear_terminate();
    env
}

#[async_trait]
impl Agent for Sequential {
    async fn receive(&mut self, env: Envelope, ctx: &AgentContext) -> FabricResult<Reply> {
        if self.steps.is_empty() {
            // An empty pipeline is the identity.
            return Ok(Reply::Single(clean_for_forward(env)));
        }

        let streaming = env.header.is_stream();
        let last = self.steps.len() - 1;

        let mut current = env;
        current.header.clear_reply_to();
        // Intermediate steps are always asked for a unary reply; only
        // the final step may stream back to the caller.
        current.header.remove(keys::STREAM);

        for (index, step) in self.steps.iter().enumerate() {
            let to = Address::named(step);
            if streaming && index == last {
                let stream = ctx.runtime().request_stream(&to, current).await?;
                return Ok(Reply::Stream(stream.into_stream()));
            }
            let reply = ctx.runtime().request(&to, current).await?;
            current = clean_for_forward(reply);
        }
        Ok(Reply::Single(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::core::FabricError;
    use crate::runtime::Runtime;
    use crate::transport::LocalTransport;
    use std::sync::Arc;
    use std::time::Duration;

    struct Append(&'static str);

    #[async_trait]
    impl Agent for Append {
        async fn receive(&mut self, env: Envelope, _ctx: &AgentContext) -> FabricResult<Reply> {
            let mut payload = env.payload;
            payload.extend_from_slice(self.0.as_bytes());
            Ok(Reply::Single(Envelope::new("text", payload)))
        }
    }

    async fn pipeline_runtime() -> Runtime {
        let runtime = Runtime::new(
            Arc::new(LocalTransport::new()),
            RuntimeConfig::new().with_request_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        for (name, suffix) in [("a", "A"), ("b", "B"), ("c", "C")] {
            runtime
                .register(AgentSpec::new(name, move || Box::new(Append(suffix))))
                .await
                .unwrap();
        }
        runtime
    }

    #[tokio::test]
    async fn test_pipeline_chains_replies() {
        let runtime = pipeline_runtime().await;
        runtime
            .register(Sequential::spec("pipeline", ["a", "b", "c"]))
            .await
            .unwrap();

        let reply = runtime
            .request(&Address::named("pipeline"), Envelope::new("text", Vec::new()))
            .await
            .unwrap();
        assert_eq!(reply.payload, b"ABC");
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_step_aborts_pipeline() {
        let runtime = pipeline_runtime().await;
        runtime
            .register(Sequential::spec("pipeline", ["a", "missing", "c"]))
            .await
            .unwrap();

        let result = runtime
            .request(&Address::named("pipeline"), Envelope::new("text", Vec::new()))
            .await;
        assert!(matches!(result, Err(FabricError::NoAgent(name)) if name == "missing"));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_streaming_forwards_only_final_step() {
        struct Chunker;

        #[async_trait]
        impl Agent for Chunker {
            async fn receive(&mut self, env: Envelope, _ctx: &AgentContext) -> FabricResult<Reply> {
                let chunks: Vec<FabricResult<Envelope>> = env
                    .payload
                    .iter()
                    .map(|byte| Ok(Envelope::new("chunk", vec![*byte])))
                    .collect();
                Ok(Reply::Stream(Box::pin(futures::stream::iter(chunks))))
            }
        }

        let runtime = pipeline_runtime().await;
        runtime
            .register(AgentSpec::new("chunker", || Box::new(Chunker)))
            .await
            .unwrap();
        runtime
            .register(Sequential::spec("pipeline", ["a", "b", "chunker"]))
            .await
            .unwrap();

        let mut env = Envelope::new("text", Vec::new());
        env.header.set_stream();
        let mut stream = runtime
            .request_stream(&Address::named("pipeline"), env)
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.unwrap().payload);
        }
        // The chunker streams one chunk per byte produced upstream.
        assert_eq!(chunks, vec![b"A".to_vec(), b"B".to_vec()]);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_identity() {
        let runtime = pipeline_runtime().await;
        runtime
            .register(Sequential::spec("pipeline", Vec::<String>::new()))
            .await
            .unwrap();

        let reply = runtime
            .request(&Address::named("pipeline"), Envelope::new("text", b"x".to_vec()))
            .await
            .unwrap();
        assert_eq!(reply.payload, b"x");
        runtime.shutdown().await;
    }
}
