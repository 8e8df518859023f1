mod common;
use common::*;

use solakon_bridge::meter::{obis_name, obis_raw_key, Status};
use solakon_bridge::prelude::*;
use solakon_bridge::transport::http::{HttpTransport, STATUS_PATH};

use std::time::Duration;

fn meter_for(server: &mockito::ServerGuard) -> MeterHub {
    let address = server.host_with_port();
    let (host, port) = address.rsplit_once(':').unwrap();
    let transport = HttpTransport::new(host, port.parse().unwrap(), Duration::from_secs(2)).unwrap();
    MeterHub::new("meter", transport)
}

async fn serve_status(server: &mut mockito::ServerGuard, status: usize, body: &str) -> mockito::Mock {
    server
        .mock("GET", STATUS_PATH)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[test]
fn obis_keys() {
    assert_eq!(obis_name("1-0:1.8.0"), Some("total_energy"));
    assert_eq!(obis_name("1-0:99.99.9"), None);
    assert_eq!(obis_raw_key("1-0:16.7.0"), "obis_1_0_16_7_0");
}

#[test]
fn status_maps_to_values() {
    common_setup();

    let status = Status::parse(serde_json::from_str(METER_STATUS).unwrap()).unwrap();
    let values = status.values();

    assert_eq!(values["uptime"], Value::Number(86400.0));
    assert_eq!(values["firmware_version"], Value::Text("1.4.2".to_string()));
    assert_eq!(values["wifi_rssi"], Value::Number(-61.0));
    assert_eq!(values["wifi_ssid"], Value::Text("garage".to_string()));
    assert_eq!(values["ip_address"], Value::Text("192.168.1.50".to_string()));
    assert_eq!(values["instantaneous_power"], Value::Number(-512.5));
    assert_eq!(values["energy_total"], Value::Number(10234.7));
    assert_eq!(values["meter_protocol"], Value::Text("SML".to_string()));

    assert_eq!(values["total_energy"], Value::Number(10234.7));
    assert_eq!(values["obis_1_0_1_8_0"], Value::Text("10234.7".to_string()));
    assert_eq!(values["meter_serial"], Value::Text("1EMH0012345678".to_string()));
    assert_eq!(values["obis_1_0_16_7_0"], Value::Text("-512".to_string()));

    // empty readings keep their raw key but get no friendly value
    assert!(!values.contains_key("voltage_l1"));
    assert_eq!(values["obis_1_0_32_7_0"], Value::Text(String::new()));
}

#[test]
fn sparse_status_is_accepted() {
    let status = Status::parse(serde_json::json!({ "extracted": { "instantaneous_power_w": 12 } }))
        .unwrap();

    assert!(status.device_info().is_none());
    let values = status.values();
    assert_eq!(values.len(), 1);
    assert_eq!(values["instantaneous_power"], Value::Number(12.0));
}

#[test]
fn device_info_from_status() {
    let status = Status::parse(serde_json::from_str(METER_STATUS).unwrap()).unwrap();
    let info = status.device_info().unwrap();

    assert_eq!(info.manufacturer, "Solakon");
    assert_eq!(info.model, "IR Meter v2");
    assert_eq!(info.serial_number.as_deref(), Some("IRM-0042"));
    assert_eq!(info.version.as_deref(), Some("1.4.2"));
    assert_eq!(info.extra["hw_revision"], "B");
    assert_eq!(info.extra["meter_manufacturer"], "EMH");
    assert_eq!(info.extra["meter_model"], "1EMH0012345678");
}

#[tokio::test]
async fn polls_status_over_http() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let mock = serve_status(&mut server, 200, METER_STATUS).await;
    let meter = meter_for(&server);

    let snapshot = meter.read_all_data().await.unwrap();
    assert_eq!(snapshot.number("instantaneous_power"), Some(-512.5));
    assert!(meter.coordinator().last_success());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_needs_device_section() {
    let mut server = mockito::Server::new_async().await;
    let _status = serve_status(&mut server, 200, METER_STATUS).await;
    assert!(meter_for(&server).test_connection().await);

    let mut server = mockito::Server::new_async().await;
    let _status = serve_status(&mut server, 200, r#"{"wifi": {"rssi": -70}}"#).await;
    let meter = meter_for(&server);
    assert!(!meter.test_connection().await);
    assert!(matches!(
        meter.get_device_info().await,
        Err(Error::Protocol(_))
    ));
}

#[tokio::test]
async fn http_error_is_transport_failure() {
    let mut server = mockito::Server::new_async().await;
    let _status = serve_status(&mut server, 500, "oops").await;
    let meter = meter_for(&server);

    let err = meter.read_all_data().await.unwrap_err();
    assert!(err.is_connection());
    assert!(!meter.coordinator().last_success());
    assert_eq!(meter.coordinator().last_failure(), Some(FailureKind::Transport));
}

#[tokio::test]
async fn invalid_json_is_transport_failure() {
    let mut server = mockito::Server::new_async().await;
    let _status = serve_status(&mut server, 200, "{ not json").await;

    let err = meter_for(&server).read_all_data().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn unreachable_meter_fails_test_connection() {
    // nothing listens on the discard port of the loopback address
    let transport = HttpTransport::new("127.0.0.1", 9, Duration::from_millis(500)).unwrap();
    let meter = MeterHub::new("meter", transport);

    assert!(!meter.test_connection().await);
}

#[tokio::test]
async fn meter_rejects_writes() {
    let server = mockito::Server::new_async().await;
    let meter = meter_for(&server);

    assert!(!meter.write_register(1, 1).await);
    assert!(!meter.write_registers(1, &[1, 2]).await);
}

#[tokio::test]
async fn meter_transport_has_no_registers() {
    let transport = HttpTransport::new("127.0.0.1", 8080, Duration::from_secs(1)).unwrap();
    assert_eq!(transport.base_url().as_str(), "http://127.0.0.1:8080/");

    assert!(matches!(
        transport.read_holding(0, 1).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        transport.write_single(0, 1).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn close_aborts_status_fetch_in_flight() {
    common_setup();

    // accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let transport =
        Arc::new(HttpTransport::new("127.0.0.1", port, Duration::from_secs(10)).unwrap());

    let tf = {
        let transport = transport.clone();
        async move { Ok::<_, anyhow::Error>(transport.fetch_status().await) }
    };
    let sf = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.close().await;
        Ok::<(), anyhow::Error>(())
    };

    let started = std::time::Instant::now();
    let (result, ()) = futures::try_join!(tf, sf).unwrap();

    assert_eq!(result.unwrap_err(), Error::Closed);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!transport.is_healthy());
}
