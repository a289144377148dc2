//! Property check: any valid interleaving of child additions and
//! removals, drained through the apply loop, leaves the parent's child
//! list equal to a plain in-memory replay of the same operations.

use mirra_engine::{Engine, EngineConfig};
use mirra_link::{Backend, SimBackend, SimStore};
use mirra_types::{SourceDiff, SourceId};
use proptest::prelude::*;
use std::sync::Arc;

const POOL: usize = 8;

/// Executes the ops against a fresh engine, skipping those invalid for
/// the current reference state, then drains once. Returns the engine's
/// final child order and the reference order.
fn run_script(ops: &[(usize, bool)]) -> (Vec<SourceId>, Vec<SourceId>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    rt.block_on(async {
        let store = Arc::new(SimStore::new());
        let backend = Arc::new(SimBackend::new(store.clone()));
        let engine = Engine::new(backend.clone(), EngineConfig::default());

        let root_diff = SourceDiff::new("project", "root");
        let root_source = root_diff.source_id;
        let root = engine.create_root(root_diff).await.unwrap();
        engine.start_updating(root).await;
        engine.update(root).await;

        let pool: Vec<SourceId> = (0..POOL).map(|_| SourceId::new()).collect();
        let mut reference: Vec<SourceId> = Vec::new();

        for &(slot, add) in ops {
            let source = pool[slot];
            let present = reference.contains(&source);
            if add && !present {
                let diff = SourceDiff::new("system", format!("child-{slot}"))
                    .with_source_id(source);
                backend.create_source(Some(root_source), diff).await.unwrap();
                reference.push(source);
            } else if !add && present {
                backend.link(source).remove().await.unwrap();
                reference.retain(|s| *s != source);
            }
        }

        let report = engine.update(root).await;
        assert!(report.is_clean(), "valid script must drain cleanly: {report:?}");

        let mut order = Vec::new();
        for child in engine.children(root).await {
            order.push(engine.source_id(child).await.unwrap());
        }
        (order, reference)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn drained_children_match_reference_replay(
        ops in proptest::collection::vec((0usize..POOL, any::<bool>()), 0..24)
    ) {
        let (order, reference) = run_script(&ops);
        prop_assert_eq!(order, reference);
    }
}
