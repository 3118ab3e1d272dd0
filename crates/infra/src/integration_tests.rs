//! Integration tests for the transaction pipeline.
//!
//! Tests: TransactionRequest → LedgerEngine → LedgerStore → history / audit
//!
//! Verifies:
//! - Movements produce the right quantities and ledger entries
//! - Refused and failed transactions leave no trace
//! - Concurrent transactions on one component serialize
//! - History is restartable and newest-first
//!
//! The Postgres variants run only when `LABSTOCK_TEST_DATABASE_URL` is set.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use proptest::prelude::*;

    use labstock_core::{ActorId, LedgerEntryId};
    use labstock_inventory::{
        Component, ComponentRef, NewComponent, TransactionKind, TransactionRequest,
    };

    use crate::config::EngineConfig;
    use crate::ledger_engine::{LedgerEngine, LedgerError};
    use crate::store::{EntryFilter, FailPoint, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};

    fn engine() -> LedgerEngine<Arc<InMemoryLedgerStore>> {
        LedgerEngine::new(Arc::new(InMemoryLedgerStore::new()), EngineConfig::default())
    }

    async fn register<S: LedgerStore>(engine: &LedgerEngine<S>, name: &str, quantity: i64) -> Component {
        engine
            .register_component(NewComponent::named(name).with_quantity(quantity))
            .await
            .unwrap()
    }

    fn manual(c: &Component, kind: TransactionKind, quantity: i64) -> TransactionRequest {
        TransactionRequest::manual(c.id, kind, quantity, ActorId::new())
    }

    async fn quantity_of<S: LedgerStore>(engine: &LedgerEngine<S>, c: &Component) -> i64 {
        engine.component(&c.id.into()).await.unwrap().quantity
    }

    async fn assert_audit_clean<S: LedgerStore>(engine: &LedgerEngine<S>, c: &Component) {
        let report = engine.audit(&c.id.into()).await.unwrap();
        assert!(report.is_consistent(), "violations: {:?}", report.violations);
    }

    #[tokio::test]
    async fn inward_increases_stock_and_records_entry() {
        let engine = engine();
        let c = register(&engine, "Resistor 10k", 45).await;

        let applied = engine
            .apply(manual(&c, TransactionKind::Inward, 10).with_reason("restock"))
            .await
            .unwrap();

        assert_eq!(applied.previous_quantity, 45);
        assert_eq!(applied.new_quantity, 55);
        assert_eq!(applied.component.quantity, 55);
        assert!(applied.scan_event.is_none());
        assert_eq!(quantity_of(&engine, &c).await, 55);

        let history = engine.history(&c.id.into()).await.unwrap().collect().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Inward);
        assert_eq!(history[0].quantity, 10);
        assert_eq!(history[0].reason.as_deref(), Some("restock"));
        assert_eq!(history[0], applied.entry);

        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test]
    async fn overdraw_is_refused_without_side_effects() {
        let engine = engine();
        let c = register(&engine, "Capacitor 100nF", 5).await;

        let err = engine.apply(manual(&c, TransactionKind::Outward, 8)).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientStock { available: 5, requested: 8 });

        assert_eq!(quantity_of(&engine, &c).await, 5);
        assert!(engine.history(&c.id.into()).await.unwrap().collect().await.unwrap().is_empty());
        assert!(engine.component(&c.id.into()).await.unwrap().last_moved.is_none());
    }

    #[tokio::test]
    async fn adjustment_sets_total_and_records_magnitude() {
        let engine = engine();
        let c = register(&engine, "Op-amp", 20).await;

        let applied = engine
            .apply(manual(&c, TransactionKind::Adjustment, 15).with_reason("cycle count"))
            .await
            .unwrap();

        assert_eq!(applied.new_quantity, 15);
        assert_eq!(applied.entry.kind, TransactionKind::Adjustment);
        assert_eq!(applied.entry.quantity, 5);
        assert_eq!(applied.entry.delta(), -5);
        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test]
    async fn scan_updates_location_and_links_scan_event() {
        let engine = engine();
        let c = register(&engine, "Arduino Nano", 4).await;
        engine.assign_scan_code(c.id, Some("QR-NANO".into())).await.unwrap();

        let applied = engine
            .apply(
                TransactionRequest::scan("QR-NANO", TransactionKind::Inward, 3, ActorId::new())
                    .with_scan_location("Bench 2"),
            )
            .await
            .unwrap();

        assert_eq!(applied.new_quantity, 7);
        assert_eq!(applied.component.location.as_deref(), Some("Bench 2"));
        assert_eq!(applied.entry.reason.as_deref(), Some("QR scan - inward"));

        let scan = applied.scan_event.clone().unwrap();
        assert_eq!(scan.ledger_entry_id, applied.entry.id);
        assert!(scan.corresponds_to(&applied.entry));

        let by_code = ComponentRef::ScanCode("QR-NANO".into());
        assert_eq!(engine.scan_events(&by_code).await.unwrap(), vec![scan]);
        assert_eq!(engine.component(&by_code).await.unwrap().location.as_deref(), Some("Bench 2"));
        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test]
    async fn scan_without_location_keeps_stored_location() {
        let engine = engine();
        let c = engine
            .register_component(NewComponent::named("Relay").with_quantity(9).with_location("Shelf A"))
            .await
            .unwrap();
        engine.assign_scan_code(c.id, Some("QR-RELAY".into())).await.unwrap();

        let applied = engine
            .apply(TransactionRequest::scan("QR-RELAY", TransactionKind::Outward, 2, ActorId::new()))
            .await
            .unwrap();
        assert_eq!(applied.component.location.as_deref(), Some("Shelf A"));
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let engine = engine();
        let scan = TransactionRequest::scan("QR-MISSING", TransactionKind::Inward, 1, ActorId::new());
        assert!(matches!(engine.apply(scan).await, Err(LedgerError::NotFound(_))));

        let ghost = TransactionRequest::manual(
            labstock_core::ComponentId::new(),
            TransactionKind::Inward,
            1,
            ActorId::new(),
        );
        assert!(matches!(engine.apply(ghost).await, Err(LedgerError::NotFound(_))));
        assert!(matches!(engine.entry(LedgerEntryId::new()).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_taking_a_lock() {
        let engine = engine();
        let c = register(&engine, "Diode", 5).await;
        let _held = engine
            .store()
            .get_for_update(&c.id.into(), Duration::from_secs(1))
            .await
            .unwrap();

        let err = engine.apply(manual(&c, TransactionKind::Outward, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRequest(_)));

        let adj_scan = TransactionRequest::scan("QR-1", TransactionKind::Adjustment, 3, ActorId::new());
        assert!(matches!(engine.apply(adj_scan).await, Err(LedgerError::InvalidRequest(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_outward_never_overdraws() {
        let engine = Arc::new(engine());
        let c = register(&engine, "Transistor", 10).await;

        let a = tokio::spawn({
            let engine = Arc::clone(&engine);
            let req = manual(&c, TransactionKind::Outward, 7);
            async move { engine.apply(req).await }
        });
        let b = tokio::spawn({
            let engine = Arc::clone(&engine);
            let req = manual(&c, TransactionKind::Outward, 7);
            async move { engine.apply(req).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { available: 3, requested: 7 })))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(refused, 1);
        assert_eq!(quantity_of(&engine, &c).await, 3);
        assert_eq!(engine.history(&c.id.into()).await.unwrap().collect().await.unwrap().len(), 1);
        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inward_loses_no_updates() {
        let engine = Arc::new(engine());
        let c = register(&engine, "Header pins", 0).await;

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let req = manual(&c, TransactionKind::Inward, 1);
                tokio::spawn(async move { engine.apply(req).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(quantity_of(&engine, &c).await, 50);
        let report = engine.audit(&c.id.into()).await.unwrap();
        assert_eq!(report.entries, 50);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn mid_unit_failures_roll_back_everything() {
        for point in [FailPoint::AppendEntry, FailPoint::AppendScanEvent, FailPoint::RecordMovement, FailPoint::Commit] {
            let store = Arc::new(InMemoryLedgerStore::new());
            let engine = LedgerEngine::new(Arc::clone(&store), EngineConfig::default());
            let c = register(&engine, "Potentiometer", 12).await;
            engine.assign_scan_code(c.id, Some("QR-POT".into())).await.unwrap();

            store.fail_next_unit(point);
            let err = engine
                .apply(TransactionRequest::scan("QR-POT", TransactionKind::Outward, 4, ActorId::new()))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::StoreUnavailable(_)), "{point:?}: {err}");

            assert_eq!(quantity_of(&engine, &c).await, 12, "{point:?}");
            assert!(engine.history(&c.id.into()).await.unwrap().collect().await.unwrap().is_empty());
            assert!(engine.scan_events(&c.id.into()).await.unwrap().is_empty());

            // The lock was released and the next attempt goes through.
            let retried = engine
                .apply(TransactionRequest::scan("QR-POT", TransactionKind::Outward, 4, ActorId::new()))
                .await
                .unwrap();
            assert_eq!(retried.new_quantity, 8);
        }
    }

    #[tokio::test]
    async fn lock_wait_is_bounded() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = EngineConfig::default().with_lock_timeout(Duration::from_millis(50));
        let engine = LedgerEngine::new(Arc::clone(&store), config);
        let c = register(&engine, "Crystal 16MHz", 10).await;

        let held = store.get_for_update(&c.id.into(), Duration::from_secs(1)).await.unwrap();
        let err = engine.apply(manual(&c, TransactionKind::Inward, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConflictOrTimeout(_)));
        assert!(err.is_retryable());
        drop(held);

        engine.apply(manual(&c, TransactionKind::Inward, 1)).await.unwrap();
        assert_eq!(quantity_of(&engine, &c).await, 11);
    }

    #[tokio::test]
    async fn unit_timeout_bounds_the_whole_transaction() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = EngineConfig::default()
            .with_unit_timeout(Duration::from_millis(50))
            .with_lock_timeout(Duration::from_secs(10));
        let engine = LedgerEngine::new(Arc::clone(&store), config);
        let c = register(&engine, "Buzzer", 2).await;

        let _held = store.get_for_update(&c.id.into(), Duration::from_secs(1)).await.unwrap();
        let err = engine.apply(manual(&c, TransactionKind::Outward, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConflictOrTimeout(_)));
        assert_eq!(quantity_of(&engine, &c).await, 2);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_restartable() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = LedgerEngine::new(store, EngineConfig::default().with_history_page_size(2));
        let c = register(&engine, "Jumper wires", 0).await;
        for q in 1..=5 {
            engine.apply(manual(&c, TransactionKind::Inward, q)).await.unwrap();
        }

        let history = engine.history(&c.id.into()).await.unwrap();
        let first: Vec<i64> = history.collect().await.unwrap().iter().map(|e| e.quantity).collect();
        let second: Vec<i64> = history.collect().await.unwrap().iter().map(|e| e.quantity).collect();
        assert_eq!(first, vec![5, 4, 3, 2, 1]);
        assert_eq!(first, second);

        let latest: Vec<i64> = history.latest(3).await.unwrap().iter().map(|e| e.quantity).collect();
        assert_eq!(latest, vec![5, 4, 3]);

        let pages: Vec<usize> = history
            .pages()
            .map(|p| p.unwrap().len())
            .collect()
            .await;
        assert_eq!(pages, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn entries_are_addressable_by_id() {
        let engine = engine();
        let c = register(&engine, "Switch", 1).await;
        let applied = engine.apply(manual(&c, TransactionKind::Inward, 2)).await.unwrap();
        assert_eq!(engine.entry(applied.entry.id).await.unwrap(), applied.entry);
    }

    #[tokio::test]
    async fn scan_codes_are_generated_kept_or_replaced() {
        let engine = engine();
        let a = register(&engine, "Sensor A", 1).await;
        let b = register(&engine, "Sensor B", 1).await;

        let generated = engine.assign_scan_code(a.id, None).await.unwrap().scan_code.unwrap();
        let again = engine.assign_scan_code(a.id, None).await.unwrap().scan_code.unwrap();
        assert_eq!(generated, again);

        let replaced = engine.assign_scan_code(a.id, Some(" QR-A ".into())).await.unwrap();
        assert_eq!(replaced.scan_code.as_deref(), Some("QR-A"));

        let err = engine.assign_scan_code(b.id, Some("QR-A".into())).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));
        assert!(matches!(
            engine.assign_scan_code(b.id, Some("  ".into())).await,
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn registration_rules() {
        let engine = engine();
        engine
            .register_component(NewComponent::named("MCU").with_part_number("ATMEGA328P"))
            .await
            .unwrap();
        let dup = engine
            .register_component(NewComponent::named("MCU 2").with_part_number("ATMEGA328P"))
            .await
            .unwrap_err();
        assert!(matches!(dup, LedgerError::AlreadyExists(_)));

        let bad = engine
            .register_component(NewComponent::named("Broken").with_quantity(-4))
            .await
            .unwrap_err();
        assert!(matches!(bad, LedgerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn low_stock_follows_movements() {
        let engine = engine();
        let c = register(&engine, "Thermistor", 15).await;
        assert!(engine.low_stock().await.unwrap().is_empty());

        engine.apply(manual(&c, TransactionKind::Outward, 5)).await.unwrap();
        let low = engine.low_stock().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, c.id);
    }

    #[tokio::test]
    async fn different_components_do_not_block_each_other() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = EngineConfig::default().with_lock_timeout(Duration::from_millis(50));
        let engine = LedgerEngine::new(Arc::clone(&store), config);
        let a = register(&engine, "Held part", 10).await;
        let b = register(&engine, "Free part", 5).await;

        let _held = store.get_for_update(&a.id.into(), Duration::from_secs(1)).await.unwrap();
        let applied = engine.apply(manual(&b, TransactionKind::Outward, 2)).await.unwrap();
        assert_eq!(applied.previous_quantity, 5);
        assert_eq!(applied.new_quantity, 3);
        assert_eq!(quantity_of(&engine, &b).await, 3);
    }

    #[tokio::test]
    async fn scan_codes_match_with_surrounding_whitespace() {
        let engine = engine();
        let c = register(&engine, "LED red", 2).await;
        engine.assign_scan_code(c.id, Some(" QR-A ".into())).await.unwrap();

        let applied = engine
            .apply(TransactionRequest::scan(" QR-A ", TransactionKind::Inward, 1, ActorId::new()))
            .await
            .unwrap();
        assert_eq!(applied.new_quantity, 3);

        let padded = ComponentRef::ScanCode(" QR-A\t".into());
        assert_eq!(engine.component(&padded).await.unwrap().id, c.id);
        assert_eq!(engine.scan_events(&padded).await.unwrap().len(), 1);
        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test]
    async fn catalog_pages_are_sorted_by_name() {
        let engine = engine();
        for name in ["Zener", "Buck converter", "Mosfet", "Antenna", "LDO"] {
            register(&engine, name, 1).await;
        }

        let first = engine.list_components(1, 2).await.unwrap();
        let names: Vec<&str> = first.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Antenna", "Buck converter"]);
        assert_eq!(first.total, 5);
        assert_eq!(first.total_pages(), 3);

        let last = engine.list_components(3, 2).await.unwrap();
        assert_eq!(last.components.len(), 1);
        assert_eq!(last.components[0].name, "Zener");
        assert!(engine.list_components(4, 2).await.unwrap().components.is_empty());

        assert!(matches!(engine.list_components(0, 2).await, Err(LedgerError::InvalidRequest(_))));
        assert!(matches!(engine.list_components(1, 0).await, Err(LedgerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn ledger_listing_spans_components_newest_first() {
        let engine = engine();
        let a = register(&engine, "Part A", 0).await;
        let b = register(&engine, "Part B", 0).await;
        for q in 1..=3 {
            engine.apply(manual(&a, TransactionKind::Inward, q)).await.unwrap();
            engine.apply(manual(&b, TransactionKind::Inward, q * 10)).await.unwrap();
        }

        let all = |limit, offset| EntryFilter { component_id: None, limit, offset };
        let quantities = |entries: Vec<labstock_inventory::LedgerEntry>| -> Vec<i64> {
            entries.iter().map(|e| e.quantity).collect()
        };

        assert_eq!(quantities(engine.list_entries(all(50, 0)).await.unwrap()), vec![30, 3, 20, 2, 10, 1]);
        assert_eq!(quantities(engine.list_entries(all(2, 1)).await.unwrap()), vec![3, 20]);
        assert!(engine.list_entries(all(10, 6)).await.unwrap().is_empty());

        let only_b = EntryFilter { component_id: Some(b.id), limit: 50, offset: 0 };
        assert_eq!(quantities(engine.list_entries(only_b).await.unwrap()), vec![30, 20, 10]);

        let ghost = EntryFilter { component_id: Some(labstock_core::ComponentId::new()), ..only_b };
        assert!(matches!(engine.list_entries(ghost).await, Err(LedgerError::NotFound(_))));
        assert!(matches!(engine.list_entries(all(0, 0)).await, Err(LedgerError::InvalidRequest(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of requests is applied, the cached quantity
        /// equals the ledger replay and never goes negative.
        #[test]
        fn engine_quantity_matches_ledger_replay(
            initial in 0i64..100,
            ops in prop::collection::vec((0usize..3, 0i64..60), 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let engine = engine();
                let c = register(&engine, "Prop part", initial).await;
                let kinds = [TransactionKind::Inward, TransactionKind::Outward, TransactionKind::Adjustment];

                for (k, q) in ops {
                    match engine.apply(manual(&c, kinds[k], q)).await {
                        Ok(applied) => assert!(applied.new_quantity >= 0),
                        Err(LedgerError::InsufficientStock { .. }) | Err(LedgerError::InvalidRequest(_)) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }

                let report = engine.audit(&c.id.into()).await.unwrap();
                assert!(report.is_consistent(), "violations: {:?}", report.violations);
                assert_eq!(report.replay.unwrap().replayed_quantity, quantity_of(&engine, &c).await);
            });
        }
    }

    async fn postgres_engine() -> Option<LedgerEngine<PostgresLedgerStore>> {
        let url = std::env::var("LABSTOCK_TEST_DATABASE_URL").ok()?;
        let store = PostgresLedgerStore::connect(&url, 8, Duration::from_secs(5)).await.unwrap();
        store.migrate().await.unwrap();
        Some(LedgerEngine::new(store, EngineConfig::default()))
    }

    #[tokio::test]
    async fn postgres_scenarios() {
        let Some(engine) = postgres_engine().await else {
            return;
        };

        let c = register(&engine, "PG resistor", 45).await;
        let applied = engine.apply(manual(&c, TransactionKind::Inward, 10)).await.unwrap();
        assert_eq!(applied.new_quantity, 55);
        assert_eq!(engine.entry(applied.entry.id).await.unwrap(), applied.entry);

        let err = engine.apply(manual(&c, TransactionKind::Outward, 100)).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientStock { available: 55, requested: 100 });

        engine.apply(manual(&c, TransactionKind::Adjustment, 50)).await.unwrap();

        let code = format!("QR-{}", c.id);
        engine.assign_scan_code(c.id, Some(code.clone())).await.unwrap();
        let scanned = engine
            .apply(TransactionRequest::scan(code, TransactionKind::Outward, 2, ActorId::new()).with_scan_location("Lab 3"))
            .await
            .unwrap();
        assert_eq!(scanned.component.location.as_deref(), Some("Lab 3"));
        assert_eq!(engine.scan_events(&c.id.into()).await.unwrap().len(), 1);

        let quantities: Vec<i64> = engine
            .history(&c.id.into())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap()
            .iter()
            .map(|e| e.quantity_after)
            .collect();
        assert_eq!(quantities, vec![48, 50, 55]);
        assert_audit_clean(&engine, &c).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn postgres_concurrent_outward_never_overdraws() {
        let Some(engine) = postgres_engine().await else {
            return;
        };
        let engine = Arc::new(engine);
        let c = register(&engine, "PG transistor", 10).await;

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let req = manual(&c, TransactionKind::Outward, 7);
                tokio::spawn(async move { engine.apply(req).await })
            })
            .collect();
        let mut ok = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e, LedgerError::InsufficientStock { available: 3, requested: 7 }),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(quantity_of(&engine, &c).await, 3);
        assert_audit_clean(&engine, &c).await;
    }
}
