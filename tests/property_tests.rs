/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use overdue_settlement::calls::normalize_phone;
use overdue_settlement::gateway_client::{numeric_customer_id, redact_payload, to_minor_units, REDACTED};
use overdue_settlement::overdue::count_overdue_days;
use proptest::prelude::*;
use serde_json::json;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
}

// Property: overdue counting is plain calendar arithmetic
proptest! {
    #[test]
    fn effective_days_never_exceed_total(
        end_offset in 0i64..2000,
        late_by in 0i64..400,
        grace in proptest::option::of(-10i32..60)
    ) {
        let end = base_date() + Duration::days(end_offset);
        let today = end + Duration::days(late_by);
        let days = count_overdue_days(end, today, grace);

        prop_assert_eq!(days.total, late_by);
        prop_assert!(days.effective <= days.total);
        prop_assert!(days.grace >= 0);
        prop_assert_eq!(days.effective, days.total - days.grace);
    }

    #[test]
    fn chargeable_exactly_when_past_grace(late_by in 0i64..100, grace in 0i32..30) {
        let end = base_date();
        let days = count_overdue_days(end, end + Duration::days(late_by), Some(grace));
        prop_assert_eq!(days.is_chargeable(), late_by > i64::from(grace));
    }
}

// Property: only short numeric identifiers reach the gateway
proptest! {
    #[test]
    fn numeric_ids_pass_through(id in "[0-9]{1,9}") {
        prop_assert_eq!(numeric_customer_id(&id), id);
    }

    #[test]
    fn anything_else_becomes_empty(id in "[0-9]{0,4}[A-Za-z-][0-9A-Za-z-]{0,20}") {
        prop_assert_eq!(numeric_customer_id(&id), "");
    }

    #[test]
    fn long_numbers_become_empty(id in "[0-9]{10,16}") {
        prop_assert_eq!(numeric_customer_id(&id), "");
    }
}

// Property: minor units are the amount times one hundred
proptest! {
    #[test]
    fn whole_and_cent_amounts_convert_exactly(major in 0u32..1_000_000, cents in 0u32..100) {
        prop_assume!(major > 0 || cents > 0);
        let amount: BigDecimal = format!("{}.{:02}", major, cents).parse().unwrap();
        let expected = u64::from(major) * 100 + u64::from(cents);
        prop_assert_eq!(to_minor_units(&amount).unwrap(), expected.to_string());
    }
}

// Property: phone normalization never panics and yields digits only
proptest! {
    #[test]
    fn normalize_phone_never_panics(raw in "\\PC*") {
        let _ = normalize_phone(&raw);
    }

    #[test]
    fn normalized_phone_is_digits(raw in "[0-9 ()+-]{1,20}") {
        if let Some(digits) = normalize_phone(&raw) {
            prop_assert!(!digits.is_empty());
            prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
        }
    }
}

// Property: credentials never survive redaction
proptest! {
    #[test]
    fn redaction_masks_secrets(secret in "[A-Za-z0-9]{4,32}", keep in "[a-z]{1,10}") {
        let payload = json!({
            "password": secret,
            "cvv2": secret,
            "nested": {"Token": secret, "creditCard": secret, "other": keep},
        });
        let redacted = redact_payload(&payload);

        prop_assert_eq!(&redacted["password"], &json!(REDACTED));
        prop_assert_eq!(&redacted["cvv2"], &json!(REDACTED));
        prop_assert_eq!(&redacted["nested"]["Token"], &json!(REDACTED));
        prop_assert_eq!(&redacted["nested"]["creditCard"], &json!(REDACTED));
        prop_assert_eq!(&redacted["nested"]["other"], &json!(keep));
    }
}
