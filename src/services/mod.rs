/// Answer submission and its fan-out (tally, score and leaderboard jobs, room events).
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Exactly-once durable answer storage per participant and question.
pub mod reconciler;
/// Event names and room broadcast helpers.
pub mod room_events;
/// Session authoring and presenter operations.
pub mod session_service;
/// Final results aggregation.
pub mod stats;
/// Store health polling and degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
