//! Property-based tests for bus addressing.
//!
//! Covers the codec laws every router relies on: packing is lossless for
//! in-range fields, the dotted form canonicalizes without losing
//! information, and endpoint handles preserve both halves.

use busroute_proto::{AddressError, BusId, BusParts, Endpoint, ServerType};
use proptest::prelude::*;

fn in_range_fields() -> impl Strategy<Value = (u32, u32, u32, u32)> {
    (0u32..16, 0u32..4096, 0u32..256, 0u32..256)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn decode_inverts_encode((w, z, t, i) in in_range_fields()) {
        let id = BusId::encode(w, z, t, i).unwrap();
        let parts = id.decode();

        prop_assert_eq!(
            parts,
            BusParts { world: w as u8, zone: z as u16, server_type: t as u8, instance: i as u8 }
        );
        prop_assert_eq!(BusId::from_parts(parts), id);
    }

    #[test]
    fn parse_inverts_format(raw in any::<u32>()) {
        let id = BusId::from_raw(raw);
        prop_assert_eq!(BusId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn wire_bytes_are_host_independent(raw in any::<u32>()) {
        let id = BusId::from_raw(raw);
        prop_assert_eq!(BusId::from_be_bytes(id.to_be_bytes()), id);
        prop_assert_eq!(id.to_be_bytes()[0] >> 4, id.world());
    }

    #[test]
    fn out_of_range_world_or_zone_is_rejected(w in 16u32..1000, z in 4096u32..100_000) {
        let world_err = matches!(BusId::encode(w, 0, 0, 0), Err(AddressError::Range { .. }));
        let zone_err = matches!(BusId::encode(0, z, 0, 0), Err(AddressError::Range { .. }));
        prop_assert!(world_err);
        prop_assert!(zone_err);
    }

    #[test]
    fn endpoint_handle_preserves_both_halves(ty in any::<u8>(), raw in any::<u32>()) {
        let ep = Endpoint::new(ServerType::new(ty), BusId::from_raw(raw));
        prop_assert_eq!(Endpoint::from_u64(ep.to_u64()), ep);
    }

    #[test]
    fn parse_never_panics(input in "[0-9a-z. ]{0,24}") {
        let _ = BusId::parse(&input);
    }
}
