//! Property-based serialization tests.
//!
//! Uses proptest to verify:
//! 1. Any envelope of non-control-character strings survives encode → decode.
//! 2. The encoded envelope always carries exactly the three wire fields.
//! 3. Random bytes never cause a panic in either decoder.
//! 4. Hub frames survive encode → decode.

use peerchat_proto::envelope::{self, ChatEnvelope};
use peerchat_proto::hub::{self, HubFrame};
use proptest::prelude::*;

/// Strategy for strings without control characters (empty allowed).
fn arb_text() -> impl Strategy<Value = String> {
    "[^\\p{Cc}]{0,256}"
}

fn arb_envelope() -> impl Strategy<Value = ChatEnvelope> {
    (arb_text(), arb_text(), arb_text()).prop_map(|(message, sender_id, sender_name)| {
        ChatEnvelope {
            message,
            sender_id,
            sender_name,
        }
    })
}

fn arb_hub_frame() -> impl Strategy<Value = HubFrame> {
    prop_oneof![
        arb_text().prop_map(|peer_id| HubFrame::Hello { peer_id }),
        arb_text().prop_map(|topic| HubFrame::Subscribe { topic }),
        (arb_text(), prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(topic, payload)| HubFrame::Publish { topic, payload }),
        (
            arb_text(),
            arb_text(),
            prop::collection::vec(any::<u8>(), 0..512)
        )
            .prop_map(|(topic, from, payload)| HubFrame::Deliver {
                topic,
                from,
                payload
            }),
        (arb_text(), prop::collection::vec(arb_text(), 0..8))
            .prop_map(|(topic, peers)| HubFrame::Members { topic, peers }),
    ]
}

proptest! {
    #[test]
    fn envelope_round_trip(env in arb_envelope()) {
        let bytes = envelope::encode(&env).unwrap();
        let decoded = envelope::decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &env);
        prop_assert_eq!(decoded.sender_id.as_bytes(), env.sender_id.as_bytes());
    }

    #[test]
    fn envelope_has_exactly_three_wire_fields(env in arb_envelope()) {
        let bytes = envelope::encode(&env).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let obj = value.as_object().unwrap();
        prop_assert_eq!(obj.len(), 3);
        prop_assert!(obj.contains_key("message"));
        prop_assert!(obj.contains_key("senderid"));
        prop_assert!(obj.contains_key("sendername"));
    }

    #[test]
    fn envelope_decode_random_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = envelope::decode(&bytes);
    }

    #[test]
    fn hub_frame_round_trip(frame in arb_hub_frame()) {
        let bytes = hub::encode(&frame).unwrap();
        prop_assert_eq!(hub::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn hub_decode_random_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = hub::decode(&bytes);
    }
}
