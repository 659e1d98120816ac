use framebus_core::envelope::keys;
use framebus_core::{BusError, Decoded, Envelope, EnvelopeCodec, Payload, Result};
use serde_json::{json, Value};

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    }
}

#[test]
fn envelope_roundtrip_preserves_all_fields() -> Result<()> {
    let codec = EnvelopeCodec::new();
    let cases = [
        (Some("svc1"), "hello", Some(json!({"a": 1}))),
        (None, "hi", Some(json!({"nested": {"list": [1, 2, 3]}, "flag": true}))),
        (Some("svc2"), "empty", Some(json!({}))),
        (None, "no-data", None),
    ];

    for (id, event_type, data) in cases {
        let wire = codec.encode(id, event_type, data.clone())?;
        let expected = Envelope::new(id.map(str::to_owned), event_type, data.map(payload));
        assert_eq!(codec.decode(&wire), Decoded::Envelope(expected));
    }
    Ok(())
}

#[test]
fn wire_format_uses_original_field_names() -> Result<()> {
    let wire = EnvelopeCodec::new().encode(Some("svc1"), "ready", Some(json!({"ok": true})))?;
    let v: Value = serde_json::from_str(&wire)?;
    let obj = v.as_object().expect("envelope is an object");
    assert_eq!(obj.len(), 3);
    assert_eq!(obj[keys::CONNECTION_ID], json!("svc1"));
    assert_eq!(obj[keys::TYPE], json!("ready"));
    assert_eq!(obj[keys::DATA], json!({"ok": true}));
    Ok(())
}

#[test]
fn scalar_payloads_are_rejected_at_encode_time() {
    let codec = EnvelopeCodec::new();
    let err = codec.encode(None, "t", Some(json!("a string"))).unwrap_err();
    assert!(matches!(err, BusError::InvalidPayloadKind { kind: "string" }));
    assert!(err.to_string().contains("string"));

    let err = codec.encode(None, "t", Some(json!(42))).unwrap_err();
    assert!(matches!(err, BusError::InvalidPayloadKind { kind: "number" }));
}

#[test]
fn decode_accepts_envelopes_from_other_senders() {
    // Extra fields are ignored; omitted data is treated as absent
    let wire = r#"{"type":"resize","connectionID":"c9","height":120}"#;
    match EnvelopeCodec::new().decode(wire) {
        Decoded::Envelope(env) => {
            assert_eq!(env.connection_id.as_deref(), Some("c9"));
            assert_eq!(env.event_type, "resize");
            assert!(env.data.is_none());
        }
        Decoded::Raw(f) => panic!("unexpected raw fallback: {}", f.reason),
    }
}

#[test]
fn decode_failure_keeps_original_text() {
    let wire = "<<definitely not json>>";
    match EnvelopeCodec::new().decode(wire) {
        Decoded::Raw(failure) => {
            assert_eq!(failure.wire, wire);
            assert_eq!(failure.raw_json(), None);
        }
        Decoded::Envelope(env) => panic!("unexpected envelope {env:?}"),
    }
}

#[test]
fn raw_encoding_roundtrips_through_decode_failure() -> Result<()> {
    let codec = EnvelopeCodec::new();
    let value = json!(["ping", 1, null]);
    let wire = codec.encode_raw(&value)?;
    match codec.decode(&wire) {
        Decoded::Raw(failure) => assert_eq!(failure.raw_json(), Some(value)),
        Decoded::Envelope(env) => panic!("unexpected envelope {env:?}"),
    }
    Ok(())
}

#[test]
fn blank_type_still_decodes_as_envelope() -> Result<()> {
    // Routing decides what to do with it; the codec only checks shape
    let wire = EnvelopeCodec::new().encode(None, "", None)?;
    assert!(EnvelopeCodec::new().decode(&wire).is_envelope());
    Ok(())
}
