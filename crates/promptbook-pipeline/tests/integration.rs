//! End-to-end tests for the pipeline crate.
//!
//! Each test goes the full way: Markdown source -> compile -> validate ->
//! execute -> inspect the result and its report.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use promptbook_pipeline::{
    compile, render, validate_pipeline, ExecutionEvent, ExecutionSettings, ExecutionTools,
    EventEmitter, LlmExecutionTools, ModelResult, PipelineExecutor, PostprocessingRegistry,
    Prompt, ScriptExecutionTools, ScriptLanguage, ScriptRequest, ValidatedPipeline,
};
use promptbook_types::{Parameters, PromptbookError, Result, Usage};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validated(source: &str) -> ValidatedPipeline {
    let pipeline = compile(source).expect("compile failed");
    validate_pipeline(pipeline).expect("validation failed")
}

fn validation_error(source: &str) -> String {
    let pipeline = compile(source).expect("compile failed");
    validate_pipeline(pipeline)
        .expect_err("validation should fail")
        .to_string()
}

fn input(pairs: &[(&str, &str)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Language model replaying scripted answers and recording the prompts it saw.
struct ScriptedLlm {
    answers: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Prompt>>,
    calls: Arc<AtomicUsize>,
    price: f64,
}

impl ScriptedLlm {
    fn new(answers: &[&str], calls: Arc<AtomicUsize>) -> Self {
        Self {
            answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            calls,
            price: 0.25,
        }
    }
}

#[async_trait]
impl LlmExecutionTools for ScriptedLlm {
    fn title(&self) -> &str {
        "Scripted"
    }

    async fn call_model(&self, prompt: &Prompt) -> Result<ModelResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let content = self
            .answers
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "no more answers".into());
        Ok(ModelResult {
            content,
            model_name: "scripted-1".into(),
            usage: Usage {
                price: self.price,
                ..Usage::zero()
            },
        })
    }
}

/// Script tools that always fail.
struct FailingScript;

#[async_trait]
impl ScriptExecutionTools for FailingScript {
    async fn execute(&self, _request: &ScriptRequest) -> Result<String> {
        Err(PromptbookError::Execution("ReferenceError: hello is not defined".into()))
    }
}

const ARTICLE: &str = r#"
# Write an article

- PROMPTBOOK URL https://example.com/article.ptbk.md
- MODEL VARIANT Chat
- INPUT PARAMETER {topic} Topic of the article
- OUTPUT PARAMETER {article}

## Draft

- EXPECT MIN 2 words

```
Write a draft about {topic}
```

`-> {draft}`

## Polish

- POSTPROCESSING trim

```
Polish this: {draft}
```

`-> {article}`
"#;

// ---------------------------------------------------------------------------
// Test 1: A rendered pipeline compiles back to the same structure
// ---------------------------------------------------------------------------

#[test]
fn render_then_compile_is_stable() {
    let first = compile(ARTICLE).unwrap();
    let second = compile(&render(&first)).unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Test 2: Logic validation catches broken dependency graphs
// ---------------------------------------------------------------------------

#[test]
fn circular_dependencies_are_rejected() {
    let msg = validation_error(
        "# Loop\n\n- OUTPUT PARAMETER {a}\n\n## A\n\n- SIMPLE TEMPLATE\n\n```\n{b}\n```\n\n`-> {a}`\n\n## B\n\n- SIMPLE TEMPLATE\n\n```\n{a}\n```\n\n`-> {b}`\n",
    );
    assert!(msg.contains("circular dependencies"), "{msg}");
    assert!(msg.contains("is waiting for {b}"), "{msg}");
}

#[test]
fn unused_input_is_accepted() {
    let pipeline = validated(
        "# Unused\n\n- INPUT PARAMETER {x}\n- OUTPUT PARAMETER {y}\n\n## Y\n\n- SIMPLE TEMPLATE\n\n```\nconstant\n```\n\n`-> {y}`\n",
    );
    assert!(pipeline.parameter("x").is_some_and(|p| p.is_input));
}

#[test]
fn unconsumed_intermediate_is_rejected() {
    let msg = validation_error(
        "# Dangling\n\n- INPUT PARAMETER {a}\n- PARAMETER {x}\n- OUTPUT PARAMETER {y}\n\n## X\n\n- SIMPLE TEMPLATE\n\n```\n{a}\n```\n\n`-> {x}`\n\n## Y\n\n- SIMPLE TEMPLATE\n\n```\n{a}!\n```\n\n`-> {y}`\n",
    );
    assert!(msg.contains("Parameter {x} is created but not used"), "{msg}");
}

#[test]
fn undeclared_dependency_never_resolves() {
    let msg = validation_error(
        "# Ghost\n\n- OUTPUT PARAMETER {y}\n\n## Y\n\n- SIMPLE TEMPLATE\n\n```\n{ghost}\n```\n\n`-> {y}`\n",
    );
    assert!(msg.contains("is waiting for {ghost}"), "{msg}");
}

// ---------------------------------------------------------------------------
// Test 3: Full run through a language model
// ---------------------------------------------------------------------------

#[tokio::test]
async fn article_pipeline_runs_in_dependency_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(ScriptedLlm::new(
        &["A draft about cats", "  A polished article  "],
        calls.clone(),
    ));
    let tools = ExecutionTools {
        llm: Some(llm.clone() as Arc<dyn LlmExecutionTools>),
        ..ExecutionTools::new()
    };
    let executor = PipelineExecutor::new(Arc::new(validated(ARTICLE)), tools);

    let result = executor.execute(input(&[("topic", "cats")])).await;

    assert!(result.is_successful, "{:?}", result.errors);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.output_parameters["article"], "A polished article");
    assert!(!result.output_parameters.contains_key("draft"));

    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts[0].content, "Write a draft about cats");
    assert_eq!(prompts[1].content, "Polish this: A draft about cats");
    assert_eq!(
        prompts[0].pipeline_url.as_deref(),
        Some("https://example.com/article.ptbk.md")
    );

    // Usage is the sum of the per-template usages
    assert_eq!(result.usage.price, 0.5);
    assert_eq!(result.usage, result.execution_report.usage);
    let report = &result.execution_report;
    assert_eq!(report.prompt_executions.len(), 2);
    assert_eq!(report.prompt_executions[0].template_name, "draft");
    assert_eq!(report.prompt_executions[1].template_name, "polish");
    assert_eq!(
        report.promptbook_used_version,
        promptbook_pipeline::PROMPTBOOK_VERSION
    );
}

// ---------------------------------------------------------------------------
// Test 4: A valid joker short-circuits the tool call
// ---------------------------------------------------------------------------

const JOKER: &str = r#"
# Joker

- MODEL VARIANT Chat
- INPUT PARAMETER {draft}
- OUTPUT PARAMETER {article}

## Write

- JOKER {draft}
- EXPECT MIN 2 words

```
Write an article from {draft}
```

`-> {article}`
"#;

#[tokio::test]
async fn joker_satisfying_expectations_skips_the_model() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(&["generated article"], calls.clone()));
    let executor = PipelineExecutor::new(Arc::new(validated(JOKER)), tools);

    let result = executor
        .execute(input(&[("draft", "already good enough")]))
        .await;

    assert!(result.is_successful);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.output_parameters["article"], "already good enough");
    let execution = &result.execution_report.prompt_executions[0];
    assert_eq!(execution.joker.as_deref(), Some("draft"));
    assert_eq!(execution.attempts, 0);
    assert!(result.usage.is_zero());
}

#[tokio::test]
async fn joker_failing_expectations_falls_through() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(&["generated article"], calls.clone()));
    let executor = PipelineExecutor::new(Arc::new(validated(JOKER)), tools);

    let result = executor.execute(input(&[("draft", "short")])).await;

    assert!(result.is_successful);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.output_parameters["article"], "generated article");
    assert!(result.execution_report.prompt_executions[0].joker.is_none());
}

// ---------------------------------------------------------------------------
// Test 5: Missing input fails before any tool is touched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_input_makes_no_tool_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(&[], calls.clone()));
    let executor = PipelineExecutor::new(Arc::new(validated(ARTICLE)), tools);

    let result = executor.execute(Parameters::new()).await;

    assert!(!result.is_successful);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        result.errors[0].to_string(),
        "Parameter {topic} is not defined"
    );
    assert!(result.execution_report.prompt_executions.is_empty());
    assert!(result.execution_report.usage.is_zero());
}

// ---------------------------------------------------------------------------
// Test 6: Retries are bounded and recover when a later attempt passes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_stops_after_max_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(
        &["one", "two", "three", "four", "five"],
        calls.clone(),
    ));
    let executor = PipelineExecutor::new(Arc::new(validated(ARTICLE)), tools).with_settings(
        ExecutionSettings {
            max_execution_attempts: 3,
            ..ExecutionSettings::default()
        },
    );

    let result = executor.execute(input(&[("topic", "cats")])).await;

    assert!(!result.is_successful);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match &result.errors[0] {
        PromptbookError::RetriesExhausted {
            template,
            attempts,
            last_error,
        } => {
            assert_eq!(template, "draft");
            assert_eq!(*attempts, 3);
            assert_eq!(last_error, "Expected at least 2 words but got 1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Failed attempts still cost
    assert_eq!(result.usage.price, 0.75);
    assert_eq!(result.execution_report.usage.price, 0.75);
    // The failing template is recorded, the one after it is not
    assert_eq!(result.execution_report.prompt_executions.len(), 1);
}

#[tokio::test]
async fn retry_recovers_on_later_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(
        &["short", "long enough now", "final"],
        calls.clone(),
    ));
    let executor = PipelineExecutor::new(Arc::new(validated(ARTICLE)), tools);

    let result = executor.execute(input(&[("topic", "cats")])).await;

    assert!(result.is_successful, "{:?}", result.errors);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.execution_report.prompt_executions[0].attempts, 2);
    assert_eq!(result.output_parameters["article"], "final");
}

// ---------------------------------------------------------------------------
// Test 7: Postprocessing applies in declared order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn postprocessing_composes_in_order() {
    let source = "# Post\n\n- INPUT PARAMETER {x}\n- OUTPUT PARAMETER {y}\n\n## Y\n\n- SIMPLE TEMPLATE\n- POSTPROCESSING appendF\n- POSTPROCESSING appendG\n\n```\n{x}\n```\n\n`-> {y}`\n";
    let mut registry = PostprocessingRegistry::with_builtins();
    registry.register("appendF", |text| Ok(format!("f({text})")));
    registry.register("appendG", |text| Ok(format!("g({text})")));

    let executor = PipelineExecutor::new(Arc::new(validated(source)), ExecutionTools::new())
        .with_postprocessing(Arc::new(registry));
    let result = executor.execute(input(&[("x", "x")])).await;

    assert!(result.is_successful, "{:?}", result.errors);
    assert_eq!(result.output_parameters["y"], "g(f(x))");
}

#[tokio::test]
async fn unregistered_postprocessing_fails_the_run() {
    let source = "# Post\n\n- INPUT PARAMETER {x}\n- OUTPUT PARAMETER {y}\n\n## Y\n\n- SIMPLE TEMPLATE\n- POSTPROCESSING shout\n\n```\n{x}\n```\n\n`-> {y}`\n";
    let executor = PipelineExecutor::new(Arc::new(validated(source)), ExecutionTools::new());
    let result = executor.execute(input(&[("x", "x")])).await;

    assert!(!result.is_successful);
    assert!(matches!(
        result.errors[0],
        PromptbookError::UnknownPostprocessing(ref name) if name == "shout"
    ));
}

// ---------------------------------------------------------------------------
// Test 8: Script failures are wrapped, missing tools are reported
// ---------------------------------------------------------------------------

const SCRIPT: &str = r#"
# Script

- INPUT PARAMETER {draft}
- OUTPUT PARAMETER {article}

## Shout

- EXECUTE SCRIPT

```javascript
return {draft}.toUpperCase();
```

`-> {article}`
"#;

#[tokio::test]
async fn script_error_lists_available_parameters() {
    let tools = ExecutionTools::new().with_script(ScriptLanguage::Javascript, FailingScript);
    let executor = PipelineExecutor::new(Arc::new(validated(SCRIPT)), tools);

    let result = executor.execute(input(&[("draft", "hello")])).await;

    assert!(!result.is_successful);
    match &result.errors[0] {
        PromptbookError::ToolFailed {
            tool,
            template,
            message,
        } => {
            assert_eq!(tool, "javascript script");
            assert_eq!(template, "shout");
            assert!(message.contains("ReferenceError"), "{message}");
            assert!(message.contains("{draft}"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(result.execution_report.prompt_executions[0].attempts, 1);
}

#[tokio::test]
async fn missing_script_tools_are_reported() {
    let executor = PipelineExecutor::new(Arc::new(validated(SCRIPT)), ExecutionTools::new());

    let result = executor.execute(input(&[("draft", "hello")])).await;

    assert!(!result.is_successful);
    match &result.errors[0] {
        PromptbookError::MissingTool { template, capability } => {
            assert_eq!(template, "shout");
            assert!(capability.contains("javascript"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test 9: One executor serves concurrent runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_runs_share_one_executor() {
    let source = "# Echo\n\n- INPUT PARAMETER {name}\n- OUTPUT PARAMETER {greeting}\n\n## Greet\n\n- SIMPLE TEMPLATE\n\n```\nHello {name}\n```\n\n`-> {greeting}`\n";
    let executor = Arc::new(PipelineExecutor::new(
        Arc::new(validated(source)),
        ExecutionTools::new(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let name = format!("user{i}");
                let result = executor.execute(input(&[("name", name.as_str())])).await;
                (name, result)
            })
        })
        .collect();

    for handle in handles {
        let (name, result) = handle.await.unwrap();
        assert!(result.is_successful);
        assert_eq!(result.output_parameters["greeting"], format!("Hello {name}"));
    }
}

// ---------------------------------------------------------------------------
// Test 10: Events describe the run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_report_failed_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ExecutionTools::new().with_llm(ScriptedLlm::new(
        &["short", "long enough now", "final"],
        calls,
    ));
    let emitter = EventEmitter::new(64);
    let mut rx = emitter.subscribe();
    let executor =
        PipelineExecutor::new(Arc::new(validated(ARTICLE)), tools).with_events(emitter);

    let result = executor.execute(input(&[("topic", "cats")])).await;
    assert!(result.is_successful);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let failed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::AttemptFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    let completed = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::TemplateCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
    assert!(events.iter().all(|e| e.run_id() == result.run_id));
}
