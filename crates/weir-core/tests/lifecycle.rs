//! End-to-end lifecycle scenarios driven through the stream processor over
//! the in-memory state store.

use serde_json::json;
use weir_core::application::expression::JmespathEvaluator;
use weir_core::domain::state::memory::{InMemoryGraphs, InMemoryState};
use weir_core::{
    ElementContextBuilder, ElementIntent, ElementType, EngineError, ExecutableNode,
    ExecutionListener, FollowUpRecord, JobKind, JobWorkerProperties, Key, Lifecycle,
    MultiInstanceProperties, ProcessGraph, SequenceFlow, StreamProcessor, Variables,
};

const DEFINITION_KEY: Key = Key(1000);

fn engine_for(graph: ProcessGraph) -> StreamProcessor {
    engine_with_state(graph, InMemoryState::new())
}

fn engine_with_state(graph: ProcessGraph, state: InMemoryState) -> StreamProcessor {
    let mut graphs = InMemoryGraphs::new();
    graphs.deploy(graph);
    StreamProcessor::new(
        Box::new(state),
        std::sync::Arc::new(graphs),
        Box::new(JmespathEvaluator),
    )
}

fn engine_for_all(graphs_to_deploy: Vec<ProcessGraph>) -> StreamProcessor {
    let mut graphs = InMemoryGraphs::new();
    for graph in graphs_to_deploy {
        graphs.deploy(graph);
    }
    StreamProcessor::new(
        Box::new(InMemoryState::new()),
        std::sync::Arc::new(graphs),
        Box::new(JmespathEvaluator),
    )
}

/// start -> work (job) -> end
fn single_task_graph() -> ProcessGraph {
    single_task_graph_with(|node| node)
}

fn single_task_graph_with(
    customize: impl FnOnce(ExecutableNode) -> ExecutableNode,
) -> ProcessGraph {
    let work = ExecutableNode::new("work", ElementType::ServiceTask)
        .in_scope("order")
        .with_incoming("f1")
        .with_job(JobWorkerProperties::with_type("work-job"))
        .with_outgoing(SequenceFlow::new("f2", "end"));
    ProcessGraph::new(
        "order",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("order", ElementType::Process)
                .with_child("start")
                .with_child("work")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("order")
                .with_outgoing(SequenceFlow::new("f1", "work")),
            customize(work),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("order")
                .with_incoming("f2"),
        ],
    )
    .unwrap()
}

fn activated_events(engine: &StreamProcessor, element_id: &str) -> Vec<Key> {
    engine
        .output()
        .events_with_intent(ElementIntent::ElementActivated)
        .into_iter()
        .filter(|(_, id)| id == element_id)
        .map(|(key, _)| key)
        .collect()
}

fn events_for_element(engine: &StreamProcessor, element_id: &str) -> Vec<ElementIntent> {
    engine
        .output()
        .records()
        .iter()
        .filter_map(|record| match record {
            FollowUpRecord::Event { intent, element_id: id, .. } if id == element_id => {
                Some(*intent)
            }
            _ => None,
        })
        .collect()
}

fn last_job_key(engine: &StreamProcessor, element_id: &str) -> Key {
    engine
        .output()
        .created_jobs()
        .iter()
        .filter(|job| job.element_id == element_id)
        .map(|job| job.element_instance_key)
        .last()
        .unwrap_or_else(|| panic!("no job created for '{element_id}'"))
}

fn complete_with(engine: &mut StreamProcessor, key: Key, variables: Variables) {
    let mut command = engine
        .command_for_instance(key, ElementIntent::CompleteElement)
        .unwrap_or_else(|| panic!("no element instance {key}"));
    command.variables = variables;
    engine.submit(command);
    engine.pump().unwrap();
}

fn complete_listener(engine: &mut StreamProcessor, key: Key, index: u32, variables: Variables) {
    let mut command = engine
        .command_for_instance(key, ElementIntent::CompleteExecutionListener)
        .unwrap_or_else(|| panic!("no element instance {key}"));
    command.listener_index = Some(index);
    command.variables = variables;
    engine.submit(command);
    engine.pump().unwrap();
}

#[test]
fn runs_a_process_to_completion() {
    let mut engine = engine_for(single_task_graph());
    engine
        .activate_process_instance("order", Variables::from_value(json!({"customer": "c-7"})))
        .unwrap();
    engine.pump().unwrap();

    // the task waits for its job
    let jobs = engine.output().created_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "work-job");
    assert_eq!(jobs[0].kind, JobKind::Task);
    let work_key = jobs[0].element_instance_key;
    assert_eq!(
        engine.state().element_instance(work_key).unwrap().state,
        Lifecycle::Activated
    );

    complete_with(
        &mut engine,
        work_key,
        Variables::from_value(json!({"charged": true})),
    );

    // everything is gone, including the process instance
    assert!(engine.state().element_instance(work_key).is_none());
    assert_eq!(activated_events(&engine, "order").len(), 1);
    assert_eq!(
        engine
            .output()
            .events_with_intent(ElementIntent::ElementCompleted)
            .iter()
            .filter(|(_, id)| id == "order")
            .count(),
        1
    );
}

#[test]
fn lifecycle_states_are_never_revisited() {
    let mut engine = engine_for(single_task_graph());
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();
    let work_key = last_job_key(&engine, "work");
    complete_with(&mut engine, work_key, Variables::new());

    let observed = events_for_element(&engine, "work");
    assert_eq!(
        observed,
        vec![
            ElementIntent::ElementActivating,
            ElementIntent::ElementActivated,
            ElementIntent::ElementCompleting,
            ElementIntent::ElementCompleted,
        ]
    );
}

/// start -> fork -> a/b (jobs) -> join -> end
fn fork_join_graph() -> ProcessGraph {
    ProcessGraph::new(
        "pay",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("pay", ElementType::Process)
                .with_child("start")
                .with_child("fork")
                .with_child("a")
                .with_child("b")
                .with_child("join")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("pay")
                .with_outgoing(SequenceFlow::new("f0", "fork")),
            ExecutableNode::new("fork", ElementType::ParallelGateway)
                .in_scope("pay")
                .with_incoming("f0")
                .with_outgoing(SequenceFlow::new("fa", "a"))
                .with_outgoing(SequenceFlow::new("fb", "b")),
            ExecutableNode::new("a", ElementType::ServiceTask)
                .in_scope("pay")
                .with_incoming("fa")
                .with_job(JobWorkerProperties::with_type("a-job"))
                .with_outgoing(SequenceFlow::new("faj", "join")),
            ExecutableNode::new("b", ElementType::ServiceTask)
                .in_scope("pay")
                .with_incoming("fb")
                .with_job(JobWorkerProperties::with_type("b-job"))
                .with_outgoing(SequenceFlow::new("fbj", "join")),
            ExecutableNode::new("join", ElementType::ParallelGateway)
                .in_scope("pay")
                .with_incoming("faj")
                .with_incoming("fbj")
                .with_outgoing(SequenceFlow::new("fe", "end")),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("pay")
                .with_incoming("fe"),
        ],
    )
    .unwrap()
}

#[test]
fn parallel_join_waits_for_every_incoming_flow() {
    let mut engine = engine_for(fork_join_graph());
    engine
        .activate_process_instance("pay", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let a_key = last_job_key(&engine, "a");
    let b_key = last_job_key(&engine, "b");

    // first branch arrives at the join: its activate command is rejected
    complete_with(&mut engine, a_key, Variables::new());
    let rejections = engine.output().rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].1, ElementIntent::ActivateElement);
    assert!(rejections[0].2.contains("not all sequence flows"));
    assert!(activated_events(&engine, "join").is_empty());

    // second branch arrives: the join fires exactly once and the process runs out
    complete_with(&mut engine, b_key, Variables::new());
    assert_eq!(activated_events(&engine, "join").len(), 1);
    assert_eq!(
        engine
            .output()
            .events_with_intent(ElementIntent::ElementCompleted)
            .iter()
            .filter(|(_, id)| id == "pay")
            .count(),
        1
    );
}

#[test]
fn concurrent_paths_complete_the_process_exactly_once() {
    // two automatic branches that race to finish in the same wave
    let graph = ProcessGraph::new(
        "race",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("race", ElementType::Process)
                .with_child("start")
                .with_child("fork")
                .with_child("a")
                .with_child("b")
                .with_child("end_a")
                .with_child("end_b"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("race")
                .with_outgoing(SequenceFlow::new("f0", "fork")),
            ExecutableNode::new("fork", ElementType::ParallelGateway)
                .in_scope("race")
                .with_incoming("f0")
                .with_outgoing(SequenceFlow::new("fa", "a"))
                .with_outgoing(SequenceFlow::new("fb", "b")),
            ExecutableNode::new("a", ElementType::ManualTask)
                .in_scope("race")
                .with_incoming("fa")
                .with_outgoing(SequenceFlow::new("fea", "end_a")),
            ExecutableNode::new("b", ElementType::ManualTask)
                .in_scope("race")
                .with_incoming("fb")
                .with_outgoing(SequenceFlow::new("feb", "end_b")),
            ExecutableNode::new("end_a", ElementType::EndEvent)
                .in_scope("race")
                .with_incoming("fea"),
            ExecutableNode::new("end_b", ElementType::EndEvent)
                .in_scope("race")
                .with_incoming("feb"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("race", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let completions: Vec<_> = engine
        .output()
        .events_with_intent(ElementIntent::ElementCompleted)
        .into_iter()
        .filter(|(_, id)| id == "race")
        .collect();
    assert_eq!(completions.len(), 1);
}

#[test]
fn activate_then_terminate_leaves_no_residual_state() {
    // a start listener keeps the task suspended in Activating
    let graph = single_task_graph_with(|node| {
        node.with_start_listener(ExecutionListener::with_type("audit"))
    });
    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let work_key = last_job_key(&engine, "work");
    assert_eq!(
        engine.state().element_instance(work_key).unwrap().state,
        Lifecycle::Activating
    );

    let terminate = engine
        .command_for_instance(work_key, ElementIntent::TerminateElement)
        .unwrap();
    engine.submit(terminate);
    engine.pump().unwrap();

    assert!(engine.state().element_instance(work_key).is_none());
    assert_eq!(
        events_for_element(&engine, "work"),
        vec![
            ElementIntent::ElementActivating,
            ElementIntent::ElementTerminating,
            ElementIntent::ElementTerminated,
        ]
    );

    // tear the whole instance down: nothing is left
    let process_key = activated_events(&engine, "order")[0];
    let terminate = engine
        .command_for_instance(process_key, ElementIntent::TerminateElement)
        .unwrap();
    engine.submit(terminate);
    engine.pump().unwrap();
    assert!(engine.state().element_instance(process_key).is_none());
    assert!(engine.state().active_siblings(process_key).is_empty());
}

#[test]
fn listener_chain_runs_in_declaration_order() {
    let graph = single_task_graph_with(|node| {
        node.with_start_listener(ExecutionListener::with_type("first"))
            .with_start_listener(ExecutionListener::with_type("second"))
    });
    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let work_key = last_job_key(&engine, "work");
    let listener_jobs: Vec<_> = engine
        .output()
        .created_jobs()
        .into_iter()
        .filter(|job| job.kind == JobKind::ExecutionListener)
        .cloned()
        .collect();
    assert_eq!(listener_jobs.len(), 1);
    assert_eq!(listener_jobs[0].job_type, "first");
    assert!(activated_events(&engine, "work").is_empty());

    complete_listener(&mut engine, work_key, 0, Variables::new());
    let listener_jobs: Vec<_> = engine
        .output()
        .created_jobs()
        .into_iter()
        .filter(|job| job.kind == JobKind::ExecutionListener)
        .cloned()
        .collect();
    assert_eq!(listener_jobs.len(), 2);
    assert_eq!(listener_jobs[1].job_type, "second");

    // replaying the first listener's completion is stale and rejected
    complete_listener(&mut engine, work_key, 0, Variables::new());
    let rejections = engine.output().rejections();
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].2.contains("out of order"));
    assert!(activated_events(&engine, "work").is_empty());

    // the second completion finishes the chain: the element activates and
    // its own job is created
    complete_listener(&mut engine, work_key, 1, Variables::new());
    assert_eq!(activated_events(&engine, "work").len(), 1);
    let task_jobs: Vec<_> = engine
        .output()
        .created_jobs()
        .into_iter()
        .filter(|job| job.kind == JobKind::Task)
        .cloned()
        .collect();
    assert_eq!(task_jobs.len(), 1);
}

#[test]
fn listener_variables_merge_into_the_configured_scope() {
    let local_listener = ExecutionListener {
        job: JobWorkerProperties::with_type("local-cleanup"),
        local: true,
    };
    // a trailing wait state keeps the process alive so its variable
    // document can be inspected after the listeners ran
    let graph = ProcessGraph::new(
        "order",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("order", ElementType::Process)
                .with_child("start")
                .with_child("work")
                .with_child("hold")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("order")
                .with_outgoing(SequenceFlow::new("f1", "work")),
            ExecutableNode::new("work", ElementType::ServiceTask)
                .in_scope("order")
                .with_incoming("f1")
                .with_job(JobWorkerProperties::with_type("work-job"))
                .with_end_listener(local_listener)
                .with_end_listener(ExecutionListener::with_type("propagate"))
                .with_outgoing(SequenceFlow::new("f2", "hold")),
            ExecutableNode::new("hold", ElementType::ServiceTask)
                .in_scope("order")
                .with_incoming("f2")
                .with_job(JobWorkerProperties::with_type("hold-job"))
                .with_outgoing(SequenceFlow::new("f3", "end")),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("order")
                .with_incoming("f3"),
        ],
    )
    .unwrap();
    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let work_key = last_job_key(&engine, "work");
    complete_with(&mut engine, work_key, Variables::new());

    // first (local) listener result stays on the instance
    complete_listener(
        &mut engine,
        work_key,
        0,
        Variables::from_value(json!({"scratch": 1})),
    );
    assert_eq!(
        engine
            .state()
            .variables(work_key)
            .get("scratch"),
        Some(&json!(1))
    );

    // second (non-local) listener result lands on the flow scope
    complete_listener(
        &mut engine,
        work_key,
        1,
        Variables::from_value(json!({"audit_ref": "a-1"})),
    );
    let process_key = activated_events(&engine, "order")[0];
    assert!(engine.state().element_instance(work_key).is_none());
    assert_eq!(
        engine.state().variables(process_key).get("audit_ref"),
        Some(&json!("a-1"))
    );
    assert!(engine.state().variables(process_key).get("scratch").is_none());
}

/// start -> sub(start2 -> fork -> a/b jobs) ; terminate sub mid-flight
fn subprocess_graph() -> ProcessGraph {
    ProcessGraph::new(
        "outer",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("outer", ElementType::Process)
                .with_child("start")
                .with_child("sub")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("outer")
                .with_outgoing(SequenceFlow::new("f1", "sub")),
            ExecutableNode::new("sub", ElementType::SubProcess)
                .in_scope("outer")
                .with_incoming("f1")
                .with_child("start2")
                .with_child("fork")
                .with_child("a")
                .with_child("b")
                .with_outgoing(SequenceFlow::new("f2", "end")),
            ExecutableNode::new("start2", ElementType::StartEvent)
                .in_scope("sub")
                .with_outgoing(SequenceFlow::new("g0", "fork")),
            ExecutableNode::new("fork", ElementType::ParallelGateway)
                .in_scope("sub")
                .with_incoming("g0")
                .with_outgoing(SequenceFlow::new("ga", "a"))
                .with_outgoing(SequenceFlow::new("gb", "b")),
            ExecutableNode::new("a", ElementType::ServiceTask)
                .in_scope("sub")
                .with_incoming("ga")
                .with_job(JobWorkerProperties::with_type("a-job")),
            ExecutableNode::new("b", ElementType::ServiceTask)
                .in_scope("sub")
                .with_incoming("gb")
                .with_job(JobWorkerProperties::with_type("b-job")),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("outer")
                .with_incoming("f2"),
        ],
    )
    .unwrap()
}

#[test]
fn container_termination_waits_for_both_children() {
    let mut engine = engine_for(subprocess_graph());
    engine
        .activate_process_instance("outer", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let sub_key = activated_events(&engine, "sub")[0];
    let terminate = engine
        .command_for_instance(sub_key, ElementIntent::TerminateElement)
        .unwrap();
    engine.submit(terminate);
    engine.pump().unwrap();

    // both tasks were torn down before the container itself finished
    let terminated: Vec<_> = engine
        .output()
        .events_with_intent(ElementIntent::ElementTerminated)
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(terminated, vec!["a".to_string(), "b".to_string(), "sub".to_string()]);
    assert!(engine.state().element_instance(sub_key).is_none());
}

/// start -> body(multi-instance over items, inner job task) -> end
fn multi_instance_graph(completion_condition: Option<&str>) -> ProcessGraph {
    let mut properties = MultiInstanceProperties {
        input_collection: "items".to_string(),
        input_element: "item".to_string(),
        inner_element: "each".to_string(),
        completion_condition: None,
    };
    properties.completion_condition = completion_condition.map(str::to_string);
    ProcessGraph::new(
        "batch",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("batch", ElementType::Process)
                .with_child("start")
                .with_child("body")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("batch")
                .with_outgoing(SequenceFlow::new("f1", "body")),
            ExecutableNode::new("body", ElementType::MultiInstanceBody)
                .in_scope("batch")
                .with_incoming("f1")
                .with_child("each")
                .with_multi_instance(properties)
                .with_outgoing(SequenceFlow::new("f2", "end")),
            ExecutableNode::new("each", ElementType::ServiceTask)
                .in_scope("body")
                .with_job(JobWorkerProperties::with_type("each-job")),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("batch")
                .with_incoming("f2"),
        ],
    )
    .unwrap()
}

#[test]
fn multi_instance_spawns_one_child_per_item() {
    let mut engine = engine_for(multi_instance_graph(None));
    engine
        .activate_process_instance("batch", Variables::from_value(json!({"items": [10, 20, 30]})))
        .unwrap();
    engine.pump().unwrap();

    let jobs = engine.output().created_jobs();
    assert_eq!(jobs.len(), 3);

    // each child sees its own item
    let child_keys: Vec<_> = jobs.iter().map(|job| job.element_instance_key).collect();
    let items: Vec<_> = child_keys
        .iter()
        .map(|key| engine.state().variables(*key).get("item").cloned().unwrap())
        .collect();
    assert_eq!(items, vec![json!(10), json!(20), json!(30)]);

    for key in child_keys {
        complete_with(&mut engine, key, Variables::new());
    }
    assert_eq!(
        engine
            .output()
            .events_with_intent(ElementIntent::ElementCompleted)
            .iter()
            .filter(|(_, id)| id == "batch")
            .count(),
        1
    );
}

#[test]
fn satisfied_completion_condition_cuts_remaining_children_short() {
    let mut engine = engine_for(multi_instance_graph(Some("done")));
    engine
        .activate_process_instance("batch", Variables::from_value(json!({"items": [1, 2, 3]})))
        .unwrap();
    engine.pump().unwrap();

    let first = engine.output().created_jobs()[0].element_instance_key;
    complete_with(&mut engine, first, Variables::from_value(json!({"done": true})));

    let terminated = engine
        .output()
        .events_with_intent(ElementIntent::ElementTerminated)
        .into_iter()
        .filter(|(_, id)| id == "each")
        .count();
    assert_eq!(terminated, 2);

    let body_completions = engine
        .output()
        .events_with_intent(ElementIntent::ElementCompleted)
        .into_iter()
        .filter(|(_, id)| id == "body")
        .count();
    assert_eq!(body_completions, 1);

    // the whole instance ran out
    assert_eq!(
        engine
            .output()
            .events_with_intent(ElementIntent::ElementCompleted)
            .iter()
            .filter(|(_, id)| id == "batch")
            .count(),
        1
    );
}

#[test]
fn failed_expression_raises_an_incident_and_resolution_replays_it() {
    // retries expression over a variable that is never set
    let graph = single_task_graph_with(|mut node| {
        node.job = Some(JobWorkerProperties {
            job_type: weir_core::ExpressionValue::Static("work-job".to_string()),
            retries: weir_core::ExpressionValue::Expression("attempts".to_string()),
        });
        node
    });
    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let raised: Vec<_> = engine
        .output()
        .records()
        .iter()
        .filter_map(|record| match record {
            FollowUpRecord::IncidentRaised { key, element_instance_key, .. } => {
                Some((*key, *element_instance_key))
            }
            _ => None,
        })
        .collect();
    assert_eq!(raised.len(), 1);
    let (incident_key, work_key) = raised[0];

    // the element is stuck in Activating until an operator intervenes
    assert_eq!(
        engine.state().element_instance(work_key).unwrap().state,
        Lifecycle::Activating
    );
    assert_eq!(engine.state().incidents_for_element(work_key), vec![incident_key]);

    // resolving replays the activate command; the guard accepts the
    // re-entry and the unchanged expression fails again
    engine.submit_incident_resolution(incident_key);
    engine.pump().unwrap();

    let resolved = engine
        .output()
        .records()
        .iter()
        .filter(|record| matches!(record, FollowUpRecord::IncidentResolved { .. }))
        .count();
    assert_eq!(resolved, 1);
    let raised_after = engine.state().incidents_for_element(work_key);
    assert_eq!(raised_after.len(), 1);
    assert_ne!(raised_after[0], incident_key);
}

#[test]
fn oversized_task_result_downgrades_to_an_incident() {
    let mut engine = engine_with_state(single_task_graph(), InMemoryState::with_record_size_limit(256));
    engine
        .activate_process_instance("order", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let work_key = last_job_key(&engine, "work");
    complete_with(
        &mut engine,
        work_key,
        Variables::from_value(json!({"blob": "x".repeat(512)})),
    );

    // the element is parked in the phase that was in flight
    assert_eq!(
        engine.state().element_instance(work_key).unwrap().state,
        Lifecycle::Completing
    );
    assert_eq!(engine.state().incidents_for_element(work_key).len(), 1);
}

#[test]
fn oversized_root_payload_is_fatal() {
    let mut engine = engine_with_state(single_task_graph(), InMemoryState::with_record_size_limit(64));
    engine
        .activate_process_instance(
            "order",
            Variables::from_value(json!({"blob": "x".repeat(512)})),
        )
        .unwrap();

    let error = engine.pump().unwrap_err();
    assert!(matches!(error, EngineError::RootRecordTooLarge { .. }));
}

#[test]
fn interrupting_boundary_event_preempts_its_activity() {
    let graph = ProcessGraph::new(
        "guarded",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("guarded", ElementType::Process)
                .with_child("start")
                .with_child("work")
                .with_child("timeout")
                .with_child("done")
                .with_child("timed_out"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("guarded")
                .with_outgoing(SequenceFlow::new("f1", "work")),
            ExecutableNode::new("work", ElementType::ServiceTask)
                .in_scope("guarded")
                .with_incoming("f1")
                .with_job(JobWorkerProperties::with_type("work-job"))
                .with_outgoing(SequenceFlow::new("f2", "done")),
            {
                let mut boundary = ExecutableNode::new("timeout", ElementType::BoundaryEvent)
                    .in_scope("guarded")
                    .with_outgoing(SequenceFlow::new("f3", "timed_out"));
                boundary.attached_to = Some("work".to_string());
                boundary.interrupting = true;
                boundary
            },
            ExecutableNode::new("done", ElementType::EndEvent)
                .in_scope("guarded")
                .with_incoming("f2"),
            ExecutableNode::new("timed_out", ElementType::EndEvent)
                .in_scope("guarded")
                .with_incoming("f3"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("guarded", Variables::new())
        .unwrap();
    engine.pump().unwrap();
    let process_key = activated_events(&engine, "guarded")[0];
    let work_key = last_job_key(&engine, "work");

    // the timer fires: the event system activates the boundary element
    let trigger = ElementContextBuilder::new(
        "timeout",
        ElementType::BoundaryEvent,
        ElementIntent::ActivateElement,
    )
    .flow_scope_key(process_key)
    .process_instance_key(process_key)
    .process_definition_key(DEFINITION_KEY)
    .build();
    engine.submit(trigger);
    engine.pump().unwrap();

    // the activity was torn down, the interrupting path ran to the end
    assert!(engine.state().element_instance(work_key).is_none());
    assert_eq!(
        events_for_element(&engine, "work")
            .into_iter()
            .rev()
            .next(),
        Some(ElementIntent::ElementTerminated)
    );
    assert_eq!(activated_events(&engine, "timed_out").len(), 1);
    assert!(activated_events(&engine, "done").is_empty());
    assert!(engine.state().element_instance(process_key).is_none());
}

#[test]
fn interrupting_event_subprocess_activates_after_siblings_terminate() {
    let graph = ProcessGraph::new(
        "escalate",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("escalate", ElementType::Process)
                .with_child("start")
                .with_child("work")
                .with_child("esp")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("escalate")
                .with_outgoing(SequenceFlow::new("f1", "work")),
            ExecutableNode::new("work", ElementType::ServiceTask)
                .in_scope("escalate")
                .with_incoming("f1")
                .with_job(JobWorkerProperties::with_type("work-job"))
                .with_outgoing(SequenceFlow::new("f2", "end")),
            {
                let mut esp = ExecutableNode::new("esp", ElementType::EventSubProcess)
                    .in_scope("escalate")
                    .with_child("esp_start")
                    .with_child("esp_end");
                esp.interrupting = true;
                esp
            },
            ExecutableNode::new("esp_start", ElementType::StartEvent)
                .in_scope("esp")
                .with_outgoing(SequenceFlow::new("g1", "esp_end")),
            ExecutableNode::new("esp_end", ElementType::EndEvent)
                .in_scope("esp")
                .with_incoming("g1"),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("escalate")
                .with_incoming("f2"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("escalate", Variables::new())
        .unwrap();
    engine.pump().unwrap();
    let process_key = activated_events(&engine, "escalate")[0];
    let work_key = last_job_key(&engine, "work");

    // the event system records the interruption and tears down the scope's
    // active work
    engine.state_mut().set_interrupted(process_key, "esp");
    let terminate = engine
        .command_for_instance(work_key, ElementIntent::TerminateElement)
        .unwrap();
    engine.submit(terminate);
    engine.pump().unwrap();

    // the event sub-process ran only after the last sibling terminated,
    // and its completion completed the process
    assert_eq!(activated_events(&engine, "esp").len(), 1);
    assert!(engine.state().element_instance(process_key).is_none());
    let work_events = events_for_element(&engine, "work");
    assert_eq!(work_events.last(), Some(&ElementIntent::ElementTerminated));
}

#[test]
fn exclusive_gateway_takes_the_first_truthy_flow() {
    let graph = ProcessGraph::new(
        "route",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("route", ElementType::Process)
                .with_child("start")
                .with_child("decide")
                .with_child("yes")
                .with_child("no"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("route")
                .with_outgoing(SequenceFlow::new("f0", "decide")),
            {
                let mut gateway = ExecutableNode::new("decide", ElementType::ExclusiveGateway)
                    .in_scope("route")
                    .with_incoming("f0")
                    .with_outgoing(SequenceFlow::conditional("fy", "yes", "approved"))
                    .with_outgoing(SequenceFlow::new("fn", "no"));
                gateway.default_flow = Some("fn".to_string());
                gateway
            },
            ExecutableNode::new("yes", ElementType::EndEvent)
                .in_scope("route")
                .with_incoming("fy"),
            ExecutableNode::new("no", ElementType::EndEvent)
                .in_scope("route")
                .with_incoming("fn"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("route", Variables::from_value(json!({"approved": true})))
        .unwrap();
    engine.pump().unwrap();

    assert_eq!(activated_events(&engine, "yes").len(), 1);
    assert!(activated_events(&engine, "no").is_empty());
}

#[test]
fn exclusive_gateway_without_a_viable_flow_raises_an_incident() {
    let graph = ProcessGraph::new(
        "route",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("route", ElementType::Process)
                .with_child("start")
                .with_child("decide")
                .with_child("yes"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("route")
                .with_outgoing(SequenceFlow::new("f0", "decide")),
            ExecutableNode::new("decide", ElementType::ExclusiveGateway)
                .in_scope("route")
                .with_incoming("f0")
                .with_outgoing(SequenceFlow::conditional("fy", "yes", "approved")),
            ExecutableNode::new("yes", ElementType::EndEvent)
                .in_scope("route")
                .with_incoming("fy"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("route", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let gateway_key = activated_events(&engine, "decide")[0];
    assert_eq!(engine.state().incidents_for_element(gateway_key).len(), 1);
    assert_eq!(
        engine.state().element_instance(gateway_key).unwrap().state,
        Lifecycle::Completing
    );
}

#[test]
fn event_based_gateway_routes_along_the_triggered_flow() {
    let graph = ProcessGraph::new(
        "wait",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("wait", ElementType::Process)
                .with_child("start")
                .with_child("race")
                .with_child("got_msg")
                .with_child("timed_out"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("wait")
                .with_outgoing(SequenceFlow::new("f0", "race")),
            ExecutableNode::new("race", ElementType::EventBasedGateway)
                .in_scope("wait")
                .with_incoming("f0")
                .with_outgoing(SequenceFlow::new("fm", "got_msg"))
                .with_outgoing(SequenceFlow::new("ft", "timed_out")),
            ExecutableNode::new("got_msg", ElementType::EndEvent)
                .in_scope("wait")
                .with_incoming("fm"),
            ExecutableNode::new("timed_out", ElementType::EndEvent)
                .in_scope("wait")
                .with_incoming("ft"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("wait", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    let gateway_key = activated_events(&engine, "race")[0];
    let opened = engine
        .output()
        .records()
        .iter()
        .any(|record| matches!(record, FollowUpRecord::SubscriptionOpened { element_instance_key, .. } if *element_instance_key == gateway_key));
    assert!(opened);

    // the timer side of the race wins
    let mut complete = engine
        .command_for_instance(gateway_key, ElementIntent::CompleteElement)
        .unwrap();
    complete.triggered_flow_id = Some("ft".to_string());
    engine.submit(complete);
    engine.pump().unwrap();

    assert_eq!(activated_events(&engine, "timed_out").len(), 1);
    assert!(activated_events(&engine, "got_msg").is_empty());
}

#[test]
fn call_activity_runs_a_child_process_and_reports_back() {
    let parent = ProcessGraph::new(
        "parent",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("parent", ElementType::Process)
                .with_child("start")
                .with_child("call")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("parent")
                .with_outgoing(SequenceFlow::new("f1", "call")),
            {
                let mut call = ExecutableNode::new("call", ElementType::CallActivity)
                    .in_scope("parent")
                    .with_incoming("f1")
                    .with_outgoing(SequenceFlow::new("f2", "end"));
                call.called_process_id = Some(weir_core::ExpressionValue::Static("child".to_string()));
                call
            },
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("parent")
                .with_incoming("f2"),
        ],
    )
    .unwrap();
    let child = ProcessGraph::new(
        "child",
        Key(2000),
        vec![
            ExecutableNode::new("child", ElementType::Process)
                .with_child("cstart")
                .with_child("cwork")
                .with_child("cend"),
            ExecutableNode::new("cstart", ElementType::StartEvent)
                .in_scope("child")
                .with_outgoing(SequenceFlow::new("c1", "cwork")),
            ExecutableNode::new("cwork", ElementType::ServiceTask)
                .in_scope("child")
                .with_incoming("c1")
                .with_job(JobWorkerProperties::with_type("child-job"))
                .with_outgoing(SequenceFlow::new("c2", "cend")),
            ExecutableNode::new("cend", ElementType::EndEvent)
                .in_scope("child")
                .with_incoming("c2"),
        ],
    )
    .unwrap();

    let mut engine = engine_for_all(vec![parent, child]);
    engine
        .activate_process_instance("parent", Variables::from_value(json!({"order": 9})))
        .unwrap();
    engine.pump().unwrap();

    // the child instance is live and saw the caller's variables
    let child_key = activated_events(&engine, "child")[0];
    assert_eq!(engine.state().variables(child_key).get("order"), Some(&json!(9)));

    let work_key = last_job_key(&engine, "cwork");
    complete_with(
        &mut engine,
        work_key,
        Variables::from_value(json!({"result": "shipped"})),
    );

    // child completion completed the call activity and then the parent,
    // propagating the child's result document upward
    assert_eq!(activated_events(&engine, "end").len(), 1);
    let parent_completions = engine
        .output()
        .events_with_intent(ElementIntent::ElementCompleted)
        .into_iter()
        .filter(|(_, id)| id == "parent")
        .count();
    assert_eq!(parent_completions, 1);
}

#[test]
fn ad_hoc_subprocess_activates_every_entry_point() {
    let graph = ProcessGraph::new(
        "adhoc",
        DEFINITION_KEY,
        vec![
            ExecutableNode::new("adhoc", ElementType::Process)
                .with_child("start")
                .with_child("box")
                .with_child("end"),
            ExecutableNode::new("start", ElementType::StartEvent)
                .in_scope("adhoc")
                .with_outgoing(SequenceFlow::new("f1", "box")),
            ExecutableNode::new("box", ElementType::AdHocSubProcess)
                .in_scope("adhoc")
                .with_incoming("f1")
                .with_child("one")
                .with_child("two")
                .with_outgoing(SequenceFlow::new("f2", "end")),
            ExecutableNode::new("one", ElementType::ManualTask).in_scope("box"),
            ExecutableNode::new("two", ElementType::ManualTask).in_scope("box"),
            ExecutableNode::new("end", ElementType::EndEvent)
                .in_scope("adhoc")
                .with_incoming("f2"),
        ],
    )
    .unwrap();

    let mut engine = engine_for(graph);
    engine
        .activate_process_instance("adhoc", Variables::new())
        .unwrap();
    engine.pump().unwrap();

    assert_eq!(activated_events(&engine, "one").len(), 1);
    assert_eq!(activated_events(&engine, "two").len(), 1);
    assert_eq!(
        engine
            .output()
            .events_with_intent(ElementIntent::ElementCompleted)
            .iter()
            .filter(|(_, id)| id == "adhoc")
            .count(),
        1
    );
}
