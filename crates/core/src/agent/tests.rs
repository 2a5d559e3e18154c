use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use turnstile_model::ModelMessage;
use turnstile_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use crate::conversation::{Message, ToolResultMessage};
use crate::testing::{PanickingTool, SleepTool, WeatherTool, call};
use crate::tool::{ErrorKind, ExternalAction};
use crate::{
    AgentBuilder, ControllerEvent, ConversationError, RoutingPolicy,
    TurnConfig, TurnError, TurnOutcome, TurnState,
};

fn book_flight() -> Vec<ExternalAction> {
    vec![
        ExternalAction::new("bookFlight", "Books a flight for the user")
            .with_parameters(json!({
                "type": "object",
                "properties": { "destination": { "type": "string" } }
            })),
    ]
}

fn agent_with(provider: &TestModelProvider) -> crate::Agent {
    AgentBuilder::with_model_provider(provider.clone())
        .with_tool(WeatherTool)
        .build()
}

#[tokio::test]
async fn test_direct_answer() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::answer("Hello! How can I help?"));
    let agent = agent_with(&provider);

    let report = agent.invoke("t1", "Hi", &book_flight()).await.unwrap();
    assert_eq!(
        report.outcome,
        TurnOutcome::Done {
            answer: "Hello! How can I help?".to_owned()
        }
    );
    assert_eq!(report.conversation.len(), 2);
    assert!(matches!(
        &report.conversation.messages()[1],
        Message::Assistant { tool_calls, .. } if tool_calls.is_empty()
    ));

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        &requests[0].messages[0],
        ModelMessage::System { content }
            if content == "You are a helpful assistant."
    ));
    let mut tools: Vec<_> =
        requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    tools.sort_unstable();
    assert_eq!(tools, ["bookFlight", "get_weather"]);
}

#[tokio::test]
async fn test_local_tool_round_trip() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "get_weather",
        json!({ "location": "Paris" }),
    )]));
    provider.add_response(PresetResponse::answer("It's 70 degrees in Paris."));
    let agent = agent_with(&provider);

    let report = agent
        .invoke("t1", "What's the weather in Paris?", &[])
        .await
        .unwrap();
    assert_eq!(report.outcome.answer(), Some("It's 70 degrees in Paris."));

    let messages = report.conversation.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[2],
        Message::ToolResult(ToolResultMessage::success(
            "c1",
            "The weather for Paris is 70 degrees."
        ))
    );

    // The second request carries the tool result.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(matches!(
        requests[1].messages.last(),
        Some(ModelMessage::Tool(result))
            if result.id == "c1" && !result.is_error
    ));
}

#[tokio::test]
async fn test_external_action_suspends_and_resumes() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "bookFlight",
        json!({ "destination": "Tokyo" }),
    )]));
    provider.add_response(PresetResponse::answer("Your flight is booked."));
    let agent = agent_with(&provider);
    let actions = book_flight();

    let report = agent
        .invoke("t1", "Book me a flight to Tokyo", &actions)
        .await
        .unwrap();
    assert_eq!(report.outcome.state(), TurnState::AwaitExternal);
    assert_eq!(report.outcome.pending().len(), 1);
    assert_eq!(report.outcome.pending()[0].id, "c1");
    assert_eq!(provider.request_count(), 1);
    // Nothing was executed locally.
    assert_eq!(report.conversation.len(), 2);

    let report = agent
        .resume(
            "t1",
            vec![ToolResultMessage::success("c1", "Booked: JL 43")],
            &actions,
        )
        .await
        .unwrap();
    assert_eq!(report.outcome.answer(), Some("Your flight is booked."));
    assert_eq!(report.conversation.len(), 4);
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_unknown_tool_becomes_error_result() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "get_stock_price",
        json!({ "symbol": "ACME" }),
    )]));
    provider.add_response(PresetResponse::answer("I can't do that."));
    let agent = agent_with(&provider);

    let report = agent.invoke("t1", "ACME?", &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("I can't do that."));
    let Message::ToolResult(result) = &report.conversation.messages()[2] else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "c1");
    assert_eq!(result.error, Some(ErrorKind::UnknownTool));

    let requests = provider.requests();
    assert!(matches!(
        requests[1].messages.last(),
        Some(ModelMessage::Tool(result)) if result.is_error
    ));
}

#[tokio::test]
async fn test_failing_tools_do_not_abort_turn() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([
        call("c1", "get_weather", json!({ "location": "nowhere" })),
        call("c2", "panic", json!({})),
    ]));
    provider.add_response(PresetResponse::answer("Something went wrong."));
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool(WeatherTool)
        .with_tool(PanickingTool)
        .build();

    let report = agent.invoke("t1", "Weather?", &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Something went wrong."));
    assert_eq!(provider.request_count(), 2);

    let requests = provider.requests();
    let results: Vec<_> = requests[1]
        .messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "c1");
    assert!(results[0].is_error);
    assert!(results[0].content.contains("no such place"));
    assert_eq!(results[1].id, "c2");
    assert!(results[1].is_error);
}

#[tokio::test]
async fn test_first_call_wins_starves_local_calls() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([
        call("c1", "bookFlight", json!({})),
        call("c2", "get_weather", json!({ "location": "Tokyo" })),
    ]));
    provider.add_response(PresetResponse::answer("All set."));
    let agent = agent_with(&provider);
    let actions = book_flight();

    let report = agent.invoke("t1", "Trip", &actions).await.unwrap();
    let pending: Vec<_> =
        report.outcome.pending().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(pending, ["c1", "c2"]);

    // Only the external one answered, the local one is still owed.
    let report = agent
        .resume("t1", vec![ToolResultMessage::success("c1", "ok")], &actions)
        .await
        .unwrap();
    let pending: Vec<_> =
        report.outcome.pending().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(pending, ["c2"]);
    assert_eq!(provider.request_count(), 1);

    let report = agent
        .resume(
            "t1",
            vec![ToolResultMessage::success("c2", "sunny")],
            &actions,
        )
        .await
        .unwrap();
    assert_eq!(report.outcome.answer(), Some("All set."));
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_first_local_call_runs_whole_batch() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([
        call("c1", "get_weather", json!({ "location": "Tokyo" })),
        call("c2", "bookFlight", json!({})),
    ]));
    provider.add_response(PresetResponse::answer("Done."));
    let agent = agent_with(&provider);

    let report = agent.invoke("t1", "Trip", &book_flight()).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Done."));
    let results: Vec<_> = report
        .conversation
        .messages()
        .iter()
        .filter_map(|msg| match msg {
            Message::ToolResult(result) => {
                Some((result.id.as_str(), result.error))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        [("c1", None), ("c2", Some(ErrorKind::UnknownTool))]
    );
}

#[tokio::test]
async fn test_per_request_routing() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([
        call("c1", "bookFlight", json!({})),
        call("c2", "get_weather", json!({ "location": "Tokyo" })),
    ]));
    provider.add_response(PresetResponse::answer("Booked, and it's sunny."));
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool(WeatherTool)
        .with_config(
            TurnConfig::builder()
                .with_routing(RoutingPolicy::PerRequest)
                .build(),
        )
        .build();
    let actions = book_flight();

    let report = agent.invoke("t1", "Trip", &actions).await.unwrap();
    let pending: Vec<_> =
        report.outcome.pending().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(pending, ["c1"]);
    // The local call already ran.
    assert_eq!(report.conversation.len(), 3);

    let report = agent
        .resume("t1", vec![ToolResultMessage::success("c1", "ok")], &actions)
        .await
        .unwrap();
    assert_eq!(report.outcome.answer(), Some("Booked, and it's sunny."));
}

#[tokio::test]
async fn test_resume_rejects_bad_results() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "bookFlight",
        json!({}),
    )]));
    let agent = agent_with(&provider);
    let actions = book_flight();
    agent.invoke("t1", "Book", &actions).await.unwrap();
    let before = agent.conversation("t1").await.unwrap();

    let err = agent
        .resume("t1", vec![ToolResultMessage::success("c9", "ok")], &actions)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TurnError::Conversation(ConversationError::UnmatchedToolResult {
            id: "c9".to_owned()
        })
    );
    assert_eq!(agent.conversation("t1").await.unwrap(), before);

    let err = agent
        .resume("missing", vec![], &actions)
        .await
        .unwrap_err();
    assert_eq!(err, TurnError::UnknownConversation("missing".to_owned()));
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_human_message_while_pending() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "bookFlight",
        json!({}),
    )]));
    let agent = agent_with(&provider);
    agent.invoke("t1", "Book", &book_flight()).await.unwrap();

    let err = agent.invoke("t1", "Hello?", &[]).await.unwrap_err();
    assert_eq!(
        err,
        TurnError::Conversation(ConversationError::PendingToolCalls {
            ids: vec!["c1".to_owned()]
        })
    );
    assert_eq!(agent.conversation("t1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_resume_done_is_noop() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::answer("Hi!"));
    let agent = agent_with(&provider);

    let first = agent.invoke("t1", "Hi", &[]).await.unwrap();
    let again = agent.resume("t1", vec![], &[]).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(provider.request_count(), 1);

    let err = agent
        .resume("t1", vec![ToolResultMessage::success("c1", "ok")], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::Conversation(_)));
}

#[tokio::test]
async fn test_retry_after_model_failure() {
    let provider = TestModelProvider::default();
    provider
        .add_response(PresetResponse::answer("Back online.").with_failures(1));
    let agent = agent_with(&provider);

    let err = agent.invoke("t1", "Hi", &[]).await.unwrap_err();
    assert!(err.is_retryable());
    // The human message stays, nothing else was appended.
    assert_eq!(agent.conversation("t1").await.unwrap().len(), 1);

    let report = agent.resume("t1", vec![], &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Back online."));
    assert_eq!(report.conversation.len(), 2);
}

#[tokio::test]
async fn test_malformed_response() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Partial".to_owned()),
        PresetEvent::Malformed("bad json".to_owned()),
    ]));
    let agent = agent_with(&provider);

    let err = agent.invoke("t1", "Hi", &[]).await.unwrap_err();
    assert!(matches!(err, TurnError::MalformedResponse(_)));
    assert!(!err.is_retryable());
    assert_eq!(agent.conversation("t1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_iteration_limit() {
    let provider = TestModelProvider::default();
    for id in ["c1", "c2"] {
        provider.add_response(PresetResponse::tool_calls([call(
            id,
            "get_weather",
            json!({ "location": "Paris" }),
        )]));
    }
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool(WeatherTool)
        .with_config(TurnConfig::builder().with_max_iterations(1).build())
        .build();

    let err = agent.invoke("t1", "Loop", &[]).await.unwrap_err();
    assert_eq!(err, TurnError::IterationLimitExceeded { limit: 1 });
    assert_eq!(provider.request_count(), 1);
    assert!(
        agent
            .conversation("t1")
            .await
            .unwrap()
            .unanswered_tool_calls()
            .is_empty()
    );
}

#[tokio::test]
async fn test_zero_iteration_limit_is_unlimited() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::answer("Hi!"));
    let config = TurnConfig {
        max_iterations: Some(0),
        ..Default::default()
    };
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_config(config)
        .build();

    let report = agent.invoke("t1", "Hello", &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Hi!"));
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_stream_events() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "get_weather",
        json!({ "location": "Paris" }),
    )]));
    provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("70 ".to_owned()),
        PresetEvent::MessageDelta("degrees".to_owned()),
    ]));
    let agent = agent_with(&provider);

    let events: Vec<_> = agent.stream("t1", "Weather?", vec![]).collect().await;
    assert_eq!(
        events,
        [
            ControllerEvent::Invoking { iteration: 1 },
            ControllerEvent::ToolDispatched(call(
                "c1",
                "get_weather",
                json!({ "location": "Paris" })
            )),
            ControllerEvent::ToolResultAppended {
                id: "c1".to_owned(),
                is_error: false
            },
            ControllerEvent::Invoking { iteration: 2 },
            ControllerEvent::MessageDelta("70 ".to_owned()),
            ControllerEvent::MessageDelta("degrees".to_owned()),
            ControllerEvent::Done {
                answer: "70 degrees".to_owned()
            },
        ]
    );
}

#[tokio::test]
async fn test_resume_stream() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "bookFlight",
        json!({}),
    )]));
    provider.add_response(PresetResponse::answer("Booked."));
    let agent = agent_with(&provider);

    let outcome = agent
        .stream("t1", "Book", book_flight())
        .into_outcome()
        .await
        .unwrap();
    assert_eq!(outcome.state(), TurnState::AwaitExternal);

    let events: Vec<_> = agent
        .resume_stream(
            "t1",
            vec![ToolResultMessage::success("c1", "ok")],
            book_flight(),
        )
        .collect()
        .await;
    assert_eq!(
        events.last(),
        Some(&ControllerEvent::Done {
            answer: "Booked.".to_owned()
        })
    );
}

#[tokio::test]
async fn test_dropping_stream_cancels_turn() {
    let mut provider = TestModelProvider::default();
    provider.set_delay(Duration::from_millis(200));
    provider.add_response(PresetResponse::answer("Too late."));
    provider.add_response(PresetResponse::answer("Here you go."));
    let agent = agent_with(&provider);

    let mut stream = agent.stream("t1", "Hi", vec![]);
    assert_eq!(
        stream.next().await,
        Some(ControllerEvent::Invoking { iteration: 1 })
    );
    drop(stream);

    // Waits for the cancelled turn to release the conversation.
    let conversation = agent.conversation("t1").await.unwrap();
    assert_eq!(conversation.len(), 1);

    let report = agent.resume("t1", vec![], &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Here you go."));
}

#[tokio::test(start_paused = true)]
async fn test_resume_interrupted_dispatch() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::tool_calls([call(
        "c1",
        "sleep",
        json!(60_000),
    )]));
    provider.add_response(PresetResponse::answer("Rested."));
    let agent = AgentBuilder::with_model_provider(provider.clone())
        .with_tool(SleepTool)
        .build();

    let mut stream = agent.stream("t1", "Take a nap", vec![]);
    while let Some(event) = stream.next().await {
        if matches!(event, ControllerEvent::ToolDispatched(_)) {
            break;
        }
    }
    drop(stream);

    // The assistant message is logged, its call is left unanswered.
    let conversation = agent.conversation("t1").await.unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.unanswered_tool_calls().len(), 1);

    let report = agent.resume("t1", vec![], &[]).await.unwrap();
    assert_eq!(report.outcome.answer(), Some("Rested."));
    assert_eq!(report.conversation.len(), 4);
    let Message::ToolResult(result) = &report.conversation.messages()[2] else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "c1");
    assert_eq!(result.content, "slept 60000ms");
    assert!(!result.is_error());
    // The model was not asked again before the call was answered.
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_cancel_stream() {
    let mut provider = TestModelProvider::default();
    provider.set_delay(Duration::from_millis(200));
    provider.add_response(PresetResponse::answer("Too late."));
    let agent = agent_with(&provider);

    let mut stream = agent.stream("t1", "Hi", vec![]);
    assert!(matches!(
        stream.next().await,
        Some(ControllerEvent::Invoking { .. })
    ));
    stream.cancel();
    assert_eq!(
        stream.next().await,
        Some(ControllerEvent::Failed(TurnError::Cancelled))
    );
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn test_conversations_are_independent() {
    let provider = TestModelProvider::default();
    provider.add_response(PresetResponse::answer("One"));
    provider.add_response(PresetResponse::answer("Two"));
    let agent = agent_with(&provider);

    agent.invoke("a", "Hi", &[]).await.unwrap();
    agent.invoke("b", "Hi", &[]).await.unwrap();
    assert_eq!(agent.conversation_ids(), ["a", "b"]);
    assert_eq!(agent.conversation("a").await.unwrap().len(), 2);

    // The second conversation didn't see the first one.
    let requests = provider.requests();
    assert_eq!(requests[1].messages.len(), 2);

    assert!(agent.end_conversation("a"));
    assert!(!agent.end_conversation("a"));
    assert!(agent.conversation("a").await.is_none());
}

#[tokio::test]
async fn test_same_conversation_turns_are_serialized() {
    let mut provider = TestModelProvider::default();
    provider.set_delay(Duration::from_millis(20));
    provider.add_response(PresetResponse::answer("First"));
    provider.add_response(PresetResponse::answer("Second"));
    let agent = agent_with(&provider);

    let (first, second) = tokio::join!(
        agent.invoke("t1", "One", &[]),
        agent.invoke("t1", "Two", &[]),
    );
    first.unwrap();
    let second = second.unwrap();
    let roles: Vec<_> = second
        .conversation
        .messages()
        .iter()
        .map(|msg| matches!(msg, Message::Human { .. }))
        .collect();
    assert_eq!(roles, [true, false, true, false]);
}
