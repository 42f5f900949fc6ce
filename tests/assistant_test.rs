//! Assistant collaborator scenarios against mocked HTTP endpoints:
//! multi-room device commands, sensor endpoint failover, and partial
//! relay failures.

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vivoice::assistant::devices::EspClient;
use vivoice::assistant::intent::{self, IntentResult, RelayState, Room, RoomTarget};
use vivoice::assistant::reply;

// ─── S3: multi-room device command ───────────────────────────

#[tokio::test]
async fn device_command_issues_one_relay_call_per_room() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("room", "kitchen"))
        .and(query_param("state", "off"))
        .respond_with(ResponseTemplate::new(200).set_body_string("relay kitchen off"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("room", "living"))
        .and(query_param("state", "off"))
        .respond_with(ResponseTemplate::new(200).set_body_string("relay living off"))
        .expect(1)
        .mount(&server)
        .await;

    let transcript = "Turn off the kitchen and living room lights";
    let command = match intent::classify(transcript) {
        IntentResult::Device(command) => command,
        other => panic!("expected device intent, got {:?}", other),
    };
    assert_eq!(command.state, RelayState::Off);
    assert_eq!(
        command.target,
        RoomTarget::Rooms(vec![Room::Kitchen, Room::Living])
    );

    let esp = EspClient::new(&server.uri());
    let outcome = esp.apply(&command).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.errors.is_empty());

    let reply_text = reply::format_device_reply(&command.target, command.state);
    assert_eq!(
        reply_text,
        "I have turned off the lights in kitchen and living room."
    );
}

#[tokio::test]
async fn device_command_partial_failure_is_aggregated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("room", "kitchen"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relay"))
        .and(query_param("room", "living"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let command = intent::detect_device_command("turn on the kitchen and living room lights")
        .expect("device command");
    let esp = EspClient::new(&server.uri());
    let outcome = esp.apply(&command).await.unwrap();

    assert!(!outcome.ok);
    assert!(outcome.text.starts_with("partial_failure"));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors.contains_key("living"));
}

#[tokio::test]
async fn all_lights_hits_every_room() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(5)
        .mount(&server)
        .await;

    let command = intent::detect_device_command("switch off all the lights").expect("command");
    assert_eq!(command.target, RoomTarget::All);

    let esp = EspClient::new(&server.uri());
    let outcome = esp.apply(&command).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.text, "ok room=all state=off");
}

// ─── S4: sensor endpoint failover ────────────────────────────

#[tokio::test]
async fn sensor_falls_back_to_second_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dht"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sensor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "temperature_c": 26.3,
            "humidity": 55.0,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = intent::detect_sensor_query("What is the temperature?").expect("sensor query");
    assert!(query.temperature);
    assert!(!query.humidity);

    let esp = EspClient::new(&server.uri());
    let reading = esp.sensor().await.unwrap();
    assert!((reading.temperature_c - 26.3).abs() < f64::EPSILON);
    assert!((reading.humidity - 55.0).abs() < f64::EPSILON);

    let reply_text = reply::format_sensor_reply(Some(&reading), query);
    assert_eq!(reply_text, "Current temperature is 26.3 degrees Celsius.");
}

#[tokio::test]
async fn sensor_unavailable_when_all_endpoints_fail() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let esp = EspClient::new(&server.uri());
    let err = esp.sensor().await.unwrap_err();
    assert!(err.to_string().contains("/sensor"), "last error wins: {}", err);

    let query = intent::detect_sensor_query("what is the humidity").expect("query");
    let reply_text = reply::format_sensor_reply(None, query);
    assert_eq!(
        reply_text,
        "I could not read temperature and humidity right now."
    );
}

#[tokio::test]
async fn sensor_rejects_ok_without_values() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dht"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "temperature_c": 21.0,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sensor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "temperature_c": 22.5,
            "humidity": 60.0,
        })))
        .mount(&server)
        .await;

    let esp = EspClient::new(&server.uri());
    let reading = esp.sensor().await.unwrap();
    // /dht was missing humidity, so /sensor's reading wins
    assert!((reading.temperature_c - 22.5).abs() < f64::EPSILON);
}
