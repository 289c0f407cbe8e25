//! Tests for the typed identifiers

use core_kernel::{BookingId, GuestId, PaymentId, RoomId, TransactionId};
use std::collections::HashSet;
use uuid::Uuid;

mod booking_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let a = BookingId::new();
        let b = BookingId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_v7_generates_time_ordered_ids() {
        let first = BookingId::new_v7();
        let second = BookingId::new_v7();
        assert!(first.as_uuid() < second.as_uuid());
    }

    #[test]
    fn test_from_str_with_and_without_prefix() {
        let uuid = Uuid::new_v4();
        let with_prefix: BookingId = format!("BKG-{}", uuid).parse().unwrap();
        let without_prefix: BookingId = uuid.to_string().parse().unwrap();
        assert_eq!(with_prefix, without_prefix);
    }

    #[test]
    fn test_json_is_transparent() {
        let id = BookingId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}

mod payment_id_tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let id = PaymentId::new();
        assert!(id.to_string().starts_with("PAY-"));
    }

    #[test]
    fn test_roundtrip() {
        let id = PaymentId::new_v7();
        let parsed: PaymentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_invalid_string_rejected() {
        assert!("PAY-not-a-uuid".parse::<PaymentId>().is_err());
    }
}

mod cross_type_tests {
    use super::*;

    #[test]
    fn test_id_prefixes_are_unique() {
        let prefixes: HashSet<&str> = [
            BookingId::prefix(),
            PaymentId::prefix(),
            TransactionId::prefix(),
            RoomId::prefix(),
            GuestId::prefix(),
        ]
        .into_iter()
        .collect();

        assert_eq!(prefixes.len(), 5);
    }

    #[test]
    fn test_same_uuid_different_types() {
        let uuid = Uuid::new_v4();
        let room = RoomId::from_uuid(uuid);
        let guest = GuestId::from_uuid(uuid);
        assert_eq!(room.as_uuid(), guest.as_uuid());
        assert_ne!(room.to_string(), guest.to_string());
    }
}
