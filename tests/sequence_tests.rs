//! End-to-end behavior of sequential pipelines: default wiring, explicit
//! pipes, option evaluation, and external document I/O

mod common;

use common::{annotate, engine, engine_with_resolver, identity, pipeline_root, registry};
use docpipe::core::Port;
use docpipe::{
    Document, Error, InMemoryResolver, Pipeline, PortBinding, QName, Variable,
};
use std::sync::Arc;

#[tokio::test]
async fn test_unbound_primary_inputs_chain_through_default_wiring() {
    let registry = registry();
    // Neither inner step declares a binding; documents flow source -> a ->
    // b -> result purely through default readable promotion.
    let pipeline = Pipeline::new(
        pipeline_root(&registry, "main")
            .with_step(identity(&registry, "a"))
            .with_step(identity(&registry, "b")),
    )
    .unwrap()
    .with_input_document("source", Document::new("<doc/>"))
    .unwrap();

    let outputs = pipeline.run(&engine()).await.unwrap();
    assert_eq!(outputs.primary(), &[Document::new("<doc/>")]);
}

#[tokio::test]
async fn test_explicit_pipe_overrides_default_wiring() {
    let registry = registry();
    // b pipes from the pipeline's own input, skipping a's annotation.
    let a = annotate(&registry, "a")
        .with_option_value(QName::new("label"), "A")
        .unwrap();
    let b = annotate(&registry, "b")
        .with_option_value(QName::new("label"), "B")
        .unwrap()
        .with_input_binding(
            "source",
            PortBinding::Pipe {
                step: "main".to_string(),
                port: "source".to_string(),
            },
        )
        .unwrap();

    let pipeline = Pipeline::new(
        pipeline_root(&registry, "main").with_step(a).with_step(b),
    )
    .unwrap()
    .with_input_document("source", Document::new("x"))
    .unwrap();

    let outputs = pipeline.run(&engine()).await.unwrap();
    assert_eq!(outputs.primary(), &[Document::new("B:x")]);
}

#[tokio::test]
async fn test_options_evaluate_in_declaration_order() {
    let registry = registry();
    // label's select reads a variable that itself reads an earlier one.
    let step = registry
        .step("annotate")
        .unwrap()
        .with_name("tag")
        .with_port(Port::input("source").sequence())
        .with_port(Port::output("result").sequence())
        .with_variable(Variable::variable(QName::new("v1")).with_value("alpha"))
        .with_variable(Variable::variable(QName::new("v2")).with_select("$v1"))
        .with_variable(Variable::option(QName::new("label")).with_select("$v2"));

    let pipeline = Pipeline::new(pipeline_root(&registry, "main").with_step(step))
        .unwrap()
        .with_input_document("source", Document::new("x"))
        .unwrap();

    let outputs = pipeline.run(&engine()).await.unwrap();
    assert_eq!(outputs.primary(), &[Document::new("alpha:x")]);
}

#[tokio::test]
async fn test_pipe_from_inner_scope_is_rejected_statically() {
    let registry = registry();
    let group = registry
        .step("group")
        .unwrap()
        .with_name("g")
        .with_port(Port::output("result").sequence())
        .with_step(identity(&registry, "hidden"));
    let outside = identity(&registry, "outside")
        .with_input_binding(
            "source",
            PortBinding::Pipe {
                step: "hidden".to_string(),
                port: "result".to_string(),
            },
        )
        .unwrap();

    let err = Pipeline::new(
        pipeline_root(&registry, "main")
            .with_step(group)
            .with_step(outside),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownPipeSource { .. }));
}

#[tokio::test]
async fn test_load_and_store_round_trip_through_resolver() {
    let registry = registry();
    let resolver = Arc::new(InMemoryResolver::new());
    resolver.insert("mem:in", Document::new("<payload/>"));

    let load = registry
        .step("load")
        .unwrap()
        .with_name("fetch")
        .with_port(Port::output("result").sequence())
        .with_variable(Variable::option(QName::new("href")).with_value("mem:in"));
    let store = registry
        .step("store")
        .unwrap()
        .with_name("save")
        .with_port(Port::input("source").sequence())
        .with_port(Port::output("result").sequence())
        .with_variable(Variable::option(QName::new("href")).with_value("mem:out"));

    let pipeline = Pipeline::new(
        registry
            .step("pipeline")
            .unwrap()
            .with_name("main")
            .with_port(Port::output("result").sequence())
            .with_step(load)
            .with_step(store),
    )
    .unwrap();

    let outputs = pipeline
        .run(&engine_with_resolver(resolver.clone()))
        .await
        .unwrap();
    assert_eq!(outputs.primary(), &[Document::new("<payload/>")]);
    assert_eq!(resolver.get("mem:out"), Some(Document::new("<payload/>")));
}

#[tokio::test]
async fn test_sequence_piped_into_non_sequence_input_is_rejected() {
    let registry = registry();
    // The pipe stays a lazy alias, so the cardinality violation can only
    // surface when the port is read.
    let narrow = registry
        .step("identity")
        .unwrap()
        .with_name("narrow")
        .with_port(Port::input("source").pipe("main", "source"))
        .with_port(Port::output("result").sequence());

    let pipeline = Pipeline::new(pipeline_root(&registry, "main").with_step(narrow))
        .unwrap()
        .with_input_document("source", Document::new("one"))
        .unwrap()
        .with_input_document("source", Document::new("two"))
        .unwrap();

    let err = pipeline.run(&engine()).await.unwrap_err();
    assert!(matches!(err, Error::SequenceNotAllowed { count: 2, .. }));
}

#[tokio::test]
async fn test_unbound_input_without_default_is_dynamic_error() {
    let registry = registry();
    // The root declares no readable source, so the first step's primary
    // input has nothing to fall back to.
    let pipeline = Pipeline::new(
        registry
            .step("pipeline")
            .unwrap()
            .with_name("main")
            .with_port(Port::output("result").sequence())
            .with_step(identity(&registry, "a")),
    )
    .unwrap();

    let err = pipeline.run(&engine()).await.unwrap_err();
    assert!(matches!(err, Error::UnboundInput { .. }));
}
