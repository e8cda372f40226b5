//! End-to-end generator behavior against scripted model clients: parse
//! retries, transient retry bounds, and determinism.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use promptgrad::{
    Example, Generator, GradError, IntParser, ModelClient, ModelError, ModelRequest,
    ModelResponse, Parameter, Prompt, RetryPolicy,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Replays a fixed list of responses, recording every prompt it was sent.
/// The last response repeats once the script runs out.
struct ScriptClient {
    script: Vec<Result<&'static str, ModelError>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptClient {
    fn new(script: Vec<Result<&'static str, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn always(text: &'static str) -> Arc<Self> {
        Self::new(vec![Ok(text)])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelClient for ScriptClient {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let entry = self.script.get(index).or(self.script.last()).unwrap();
        entry.clone().map(ModelResponse::new)
    }
}

fn qa_generator(client: Arc<ScriptClient>, max_parse_attempts: u32) -> Generator {
    let instruction = Parameter::new("system instruction", "Answer concisely.");
    Generator::builder()
        .name("qa")
        .template(Prompt::new("{{instruction}}\n\nQ: {{question}}\nA:"))
        .params(vec![("instruction".into(), instruction)])
        .client(client)
        .parser(Arc::new(IntParser))
        .call_retry(RetryPolicy::immediate(3))
        .max_parse_attempts(max_parse_attempts)
        .build()
}

#[tokio::test]
async fn answers_and_parses_on_first_attempt() {
    let client = ScriptClient::always("4");
    let generator = qa_generator(client.clone(), 2);

    let output = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap();

    assert_eq!(output.value(), Some(&json!(4)));
    assert_eq!(output.call_attempts, 1);
    assert_eq!(output.parse_attempts, 1);
    assert_eq!(client.calls(), 1);
    assert!(client.prompt(0).contains("Answer concisely."));
    assert!(client.prompt(0).contains("Q: 2+2?"));
}

#[tokio::test]
async fn unparseable_output_becomes_parse_failed_not_error() {
    let client = ScriptClient::always("four");
    let generator = qa_generator(client.clone(), 3);

    let output = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap();

    assert!(output.is_parse_failed());
    assert_eq!(output.raw, "four");
    assert_eq!(output.value(), None);
    assert_eq!(output.parse_attempts, 3);
    // Every parse retry resubmits the whole model call.
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn parse_retry_appends_clarification() {
    let client = ScriptClient::new(vec![Ok("four"), Ok("4")]);
    let generator = qa_generator(client.clone(), 2);

    let output = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap();

    assert_eq!(output.value(), Some(&json!(4)));
    assert_eq!(output.parse_attempts, 2);
    assert!(!client.prompt(0).contains("could not be parsed"));
    assert!(client.prompt(1).contains("could not be parsed"));
    assert!(client.prompt(1).contains("single integer"));
}

#[tokio::test]
async fn transient_failures_retry_exactly_to_the_bound() {
    let client = ScriptClient::new(vec![Err(ModelError::Transient("rate limited".into()))]);
    let generator = qa_generator(client.clone(), 2);

    let err = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap_err();

    match err {
        GradError::TransientCall { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected TransientCall, got {other}"),
    }
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn request_errors_surface_immediately() {
    let client = ScriptClient::new(vec![Err(ModelError::Request("bad auth".into()))]);
    let generator = qa_generator(client.clone(), 2);

    let err = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap_err();

    assert!(matches!(err, GradError::Request(_)));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn transient_then_success_recovers() {
    let client = ScriptClient::new(vec![
        Err(ModelError::Transient("connection reset".into())),
        Ok("4"),
    ]);
    let generator = qa_generator(client.clone(), 2);

    let output = generator
        .generate(&Example::from_input("question", "2+2?"))
        .await
        .unwrap();

    assert_eq!(output.value(), Some(&json!(4)));
    assert_eq!(output.call_attempts, 2);
    assert_eq!(output.parse_attempts, 1);
}

#[tokio::test]
async fn forward_is_deterministic_with_a_stub_client() {
    let client = ScriptClient::always("4");
    let generator = qa_generator(client, 2);
    let input = Example::from_input("question", "2+2?");

    let first = generator.generate(&input).await.unwrap();
    let second = generator.generate(&input).await.unwrap();

    assert_eq!(first.value(), second.value());
    assert_eq!(first.raw, second.raw);
}

#[tokio::test]
async fn missing_binding_is_a_config_error() {
    let client = ScriptClient::always("4");
    let generator = qa_generator(client.clone(), 2);

    let err = generator.generate(&Example::default()).await.unwrap_err();

    assert!(matches!(err, GradError::MissingInput(name) if name == "question"));
    assert_eq!(client.calls(), 0);
}
