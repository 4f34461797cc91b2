//! Integration tests for the buy and sell sagas.
//!
//! Every test runs the real pieces over the in-memory bus: the ledger and
//! inventory domain event handlers, the response router and the coordinator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{CorrelationId, ItemId, Money, PlayerId};
use domain::{
    CatalogItem, INVENTORY_TOPIC, InMemoryInventory, InMemoryLedger, InventoryRepository,
    LedgerRepository, PLAYER_TOPIC, StepKey,
};
use handlers::{DomainEventHandler, InventoryHandler, LedgerHandler};
use message_bus::{CheckpointedConsumer, InMemoryCheckpointStore, InMemoryMessageBus};
use saga::{
    InMemoryCatalog, ItemServiceReq, LineItem, RESPONSE_SCOPE, SagaConfig, SagaCoordinator,
    SagaError, SagaState,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type TestCoordinator = SagaCoordinator<InMemoryMessageBus, InMemoryCatalog>;

struct TestHarness {
    coordinator: Arc<TestCoordinator>,
    bus: InMemoryMessageBus,
    checkpoints: InMemoryCheckpointStore,
    ledger: InMemoryLedger,
    inventory: InMemoryInventory,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_config(SagaConfig::default().with_step_timeout(Duration::from_secs(2)), true)
            .await
    }

    async fn with_config(config: SagaConfig, with_inventory: bool) -> Self {
        let bus = InMemoryMessageBus::new();
        let catalog = InMemoryCatalog::with_items([
            CatalogItem::new("sword", "Sword", Money::from_cents(100)),
            CatalogItem::new("shield", "Shield", Money::from_cents(250)),
            CatalogItem::new("potion", "Potion", Money::from_cents(15)),
        ])
        .await;

        let mut harness = Self {
            coordinator: Arc::new(SagaCoordinator::new(bus.clone(), catalog, config)),
            bus,
            checkpoints: InMemoryCheckpointStore::new(),
            ledger: InMemoryLedger::new(),
            inventory: InMemoryInventory::new(),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        };

        harness.start_ledger();
        harness.start_router();
        if with_inventory {
            harness.start_inventory();
        }
        harness
    }

    fn start_ledger(&mut self) {
        let handler = DomainEventHandler::new(
            self.bus.clone(),
            self.checkpoints.clone(),
            LedgerHandler::new(self.ledger.clone()),
        );
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            handler.run(shutdown).await.unwrap();
        }));
    }

    fn start_inventory(&mut self) {
        let handler = DomainEventHandler::new(
            self.bus.clone(),
            self.checkpoints.clone(),
            InventoryHandler::new(self.inventory.clone()),
        );
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            handler.run(shutdown).await.unwrap();
        }));
    }

    fn start_router(&mut self) {
        let router = self.coordinator.response_router();
        let consumer = CheckpointedConsumer::new(
            self.bus.clone(),
            self.checkpoints.clone(),
            domain::PAYMENT_TOPIC,
        )
        .with_scope(RESPONSE_SCOPE);
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            consumer.run(&router, shutdown).await.unwrap();
        }));
    }

    async fn deposit(&self, player: &PlayerId, cents: i64) {
        self.ledger
            .credit(player, Money::from_cents(cents), CorrelationId::new())
            .await
            .unwrap();
    }

    async fn balance(&self, player: &PlayerId) -> Money {
        self.ledger.balance(player).await.unwrap()
    }

    async fn buy(&self, player: &PlayerId, items: &[(&str, u32)]) -> saga::Result<saga::SagaReceipt> {
        self.coordinator
            .buy_item(player, &request(items), &CancellationToken::new())
            .await
    }

    async fn sell(&self, player: &PlayerId, items: &[(&str, u32)]) -> saga::Result<saga::SagaReceipt> {
        self.coordinator
            .sell_item(player, &request(items), &CancellationToken::new())
            .await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

fn request(items: &[(&str, u32)]) -> ItemServiceReq {
    ItemServiceReq::new(
        items
            .iter()
            .map(|(id, qty)| LineItem::new(*id).with_quantity(*qty)),
    )
}

fn player() -> PlayerId {
    PlayerId::new("player-1")
}

fn sword() -> ItemId {
    ItemId::new("sword")
}

/// Polls `check` until it holds; compensations are applied asynchronously.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {what}");
}

mod buy_item {
    use super::*;

    #[tokio::test]
    async fn buying_a_sword_debits_and_grants() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 150).await;

        let receipt = harness.buy(&player(), &[("sword", 1)]).await.unwrap();

        assert_eq!(receipt.state, SagaState::Committed);
        assert_eq!(receipt.results.len(), 1);
        assert_eq!(receipt.results[0].step, StepKey::Grant);
        assert!(receipt.results[0].inventory_id.is_some());

        let entries = harness.ledger.entries(&player()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].amount, Money::from_cents(-100));
        assert_eq!(harness.balance(&player()).await, Money::from_cents(50));
        assert_eq!(harness.inventory.count_owned(&player(), &sword()).await, 1);

        harness.stop().await;
    }

    #[tokio::test]
    async fn quantities_become_one_record_per_unit() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 1_000).await;

        let receipt = harness
            .buy(&player(), &[("sword", 2), ("potion", 3)])
            .await
            .unwrap();

        assert_eq!(receipt.results.len(), 5);
        // -(2 * 100 + 3 * 15)
        assert_eq!(harness.balance(&player()).await, Money::from_cents(755));
        assert_eq!(harness.inventory.record_count().await, 5);
        assert_eq!(
            harness
                .inventory
                .count_owned(&player(), &ItemId::new("potion"))
                .await,
            3
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn grant_failure_reverses_the_debit() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 150).await;
        harness.inventory.set_fail_on_grant(true).await;

        let err = harness.buy(&player(), &[("sword", 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::StepRejected {
                step: StepKey::Grant,
                ..
            }
        ));

        eventually("debit reversed", || async {
            harness.balance(&player()).await == Money::from_cents(150)
        })
        .await;

        let amounts: Vec<i64> = harness
            .ledger
            .entries(&player())
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount.cents())
            .collect();
        assert_eq!(amounts, [150, -100, 100]);
        assert_eq!(harness.inventory.record_count().await, 0);

        harness.stop().await;
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_without_granting() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 50).await;

        let err = harness.buy(&player(), &[("sword", 1)]).await.unwrap_err();
        match err {
            SagaError::StepRejected { step, reason } => {
                assert_eq!(step, StepKey::Debit);
                assert!(reason.starts_with("player balance is not enough"));
            }
            other => panic!("unexpected error {other}"),
        }

        assert!(harness.bus.messages(INVENTORY_TOPIC).await.is_empty());
        assert!(
            harness
                .bus
                .messages_with_key(PLAYER_TOPIC, "reverse_entry")
                .await
                .is_empty()
        );
        assert_eq!(harness.balance(&player()).await, Money::from_cents(50));

        harness.stop().await;
    }

    #[tokio::test]
    async fn partial_debit_failure_reverses_earlier_debits() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 150).await;

        let err = harness.buy(&player(), &[("sword", 2)]).await.unwrap_err();
        assert!(matches!(err, SagaError::StepRejected { step: StepKey::Debit, .. }));

        eventually("first debit reversed", || async {
            harness.balance(&player()).await == Money::from_cents(150)
        })
        .await;
        assert!(harness.bus.messages(INVENTORY_TOPIC).await.is_empty());
        assert_eq!(
            harness
                .bus
                .messages_with_key(PLAYER_TOPIC, "reverse_entry")
                .await
                .len(),
            1
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn unknown_item_fails_before_any_step() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 500).await;

        let err = harness
            .buy(&player(), &[("sword", 1), ("bow", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::ItemNotFound(id) if id.as_str() == "bow"));
        assert!(harness.bus.messages(PLAYER_TOPIC).await.is_empty());
        harness.stop().await;
    }

    #[tokio::test]
    async fn empty_request_is_invalid() {
        let harness = TestHarness::new().await;
        let err = harness.buy(&player(), &[]).await.unwrap_err();
        assert!(matches!(err, SagaError::InvalidRequest(_)));
        harness.stop().await;
    }

    #[tokio::test]
    async fn concurrent_buys_are_paired_with_their_own_responses() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 100).await;

        let first_player = player();
        let second_player = player();
        let (first, second) = tokio::join!(
            harness.buy(&first_player, &[("sword", 1)]),
            harness.buy(&second_player, &[("sword", 1)])
        );

        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        eventually("one sword, no money left", || async {
            harness.balance(&player()).await == Money::zero()
                && harness.inventory.record_count().await == 1
        })
        .await;

        harness.stop().await;
    }

    #[tokio::test]
    async fn timed_out_grant_is_compensated() {
        let config = SagaConfig::default().with_step_timeout(Duration::from_millis(200));
        let mut harness = TestHarness::with_config(config, false).await;
        harness.deposit(&player(), 100).await;

        let err = harness.buy(&player(), &[("sword", 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::StepTimeout {
                step: StepKey::Grant,
                ..
            }
        ));

        eventually("debit reversed", || async {
            harness.balance(&player()).await == Money::from_cents(100)
        })
        .await;
        assert_eq!(
            harness
                .bus
                .messages_with_key(INVENTORY_TOPIC, "rollback_grant")
                .await
                .len(),
            1
        );

        // The inventory service comes back: the late grant is applied and
        // immediately rolled back.
        harness.start_inventory();
        eventually("inventory caught up", || async {
            harness.inventory.record_count().await == 0
                && harness.bus.messages(domain::PAYMENT_TOPIC).await.len() == 2
        })
        .await;

        harness.stop().await;
    }

    #[tokio::test]
    async fn cancelled_before_start_publishes_nothing() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 100).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = harness
            .coordinator
            .buy_item(&player(), &request(&[("sword", 1)]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::Cancelled));
        assert!(harness.bus.messages(PLAYER_TOPIC).await.is_empty());
        harness.stop().await;
    }

    #[tokio::test]
    async fn cancelled_mid_saga_compensates_issued_steps() {
        let config = SagaConfig::default().with_step_timeout(Duration::from_secs(10));
        let harness = TestHarness::with_config(config, false).await;
        harness.deposit(&player(), 100).await;
        let cancel = CancellationToken::new();

        let canceller = {
            let bus = harness.bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Cancel while the grant is waiting for the missing inventory service.
                while bus.messages_with_key(INVENTORY_TOPIC, "grant").await.is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let err = harness
            .coordinator
            .buy_item(&player(), &request(&[("sword", 1)]), &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, SagaError::Cancelled));
        eventually("debit reversed", || async {
            harness.balance(&player()).await == Money::from_cents(100)
        })
        .await;
        assert_eq!(
            harness
                .bus
                .messages_with_key(INVENTORY_TOPIC, "rollback_grant")
                .await
                .len(),
            1
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn unpublished_grant_reverses_the_debit() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 150).await;
        harness.bus.set_fail_on_publish(INVENTORY_TOPIC, true).await;

        let err = harness.buy(&player(), &[("sword", 1)]).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::PublishFailed {
                step: StepKey::Grant,
                ..
            }
        ));
        eventually("debit reversed", || async {
            harness.balance(&player()).await == Money::from_cents(150)
        })
        .await;
        assert_eq!(harness.inventory.record_count().await, 0);
        // A grant that never went out has nothing to roll back.
        assert!(
            harness
                .bus
                .messages_with_key(INVENTORY_TOPIC, "rollback_grant")
                .await
                .is_empty()
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn lost_compensation_does_not_stop_the_others() {
        let config = SagaConfig::default().with_step_timeout(Duration::from_millis(150));
        let harness = TestHarness::with_config(config, false).await;
        harness.deposit(&player(), 500).await;

        // Once stage 2 has started every debit is applied; from then on the
        // player topic refuses writes, so the debit reversals are lost.
        let watcher = {
            let bus = harness.bus.clone();
            tokio::spawn(async move {
                while bus.messages_with_key(INVENTORY_TOPIC, "grant").await.is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                bus.set_fail_on_publish(PLAYER_TOPIC, true).await;
            })
        };

        let err = harness.buy(&player(), &[("sword", 2)]).await.unwrap_err();
        watcher.await.unwrap();

        assert!(matches!(
            err,
            SagaError::StepTimeout {
                step: StepKey::Grant,
                ..
            }
        ));
        assert_eq!(
            harness
                .bus
                .messages_with_key(INVENTORY_TOPIC, "rollback_grant")
                .await
                .len(),
            2
        );
        assert!(
            harness
                .bus
                .messages_with_key(PLAYER_TOPIC, "reverse_entry")
                .await
                .is_empty()
        );
        // Left for manual reconciliation.
        assert_eq!(harness.balance(&player()).await, Money::from_cents(300));

        harness.stop().await;
    }
}

mod sell_item {
    use super::*;

    #[tokio::test]
    async fn selling_credits_eighty_percent() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 100).await;
        harness.buy(&player(), &[("sword", 1)]).await.unwrap();

        let receipt = harness.sell(&player(), &[("sword", 1)]).await.unwrap();

        assert_eq!(receipt.state, SagaState::Committed);
        assert_eq!(receipt.results[0].step, StepKey::Credit);
        assert_eq!(receipt.results[0].amount, Money::from_cents(80));
        assert_eq!(harness.balance(&player()).await, Money::from_cents(80));
        assert_eq!(harness.inventory.record_count().await, 0);

        harness.stop().await;
    }

    #[tokio::test]
    async fn payout_rounds_every_credit_the_same_way() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 45).await;
        harness.buy(&player(), &[("potion", 3)]).await.unwrap();

        let receipt = harness.sell(&player(), &[("potion", 3)]).await.unwrap();

        // 15 * 0.8 = 12 per unit
        assert!(receipt.results.iter().all(|r| r.amount == Money::from_cents(12)));
        assert_eq!(harness.balance(&player()).await, Money::from_cents(36));

        harness.stop().await;
    }

    #[tokio::test]
    async fn selling_an_unowned_item_fails_without_credit() {
        let harness = TestHarness::new().await;

        let err = harness.sell(&player(), &[("sword", 1)]).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::StepRejected {
                step: StepKey::Revoke,
                ..
            }
        ));
        assert!(harness.bus.messages(PLAYER_TOPIC).await.is_empty());
        assert_eq!(harness.balance(&player()).await, Money::zero());

        harness.stop().await;
    }

    #[tokio::test]
    async fn partial_revoke_failure_restores_revoked_units() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 100).await;
        harness.buy(&player(), &[("sword", 1)]).await.unwrap();

        let err = harness.sell(&player(), &[("sword", 2)]).await.unwrap_err();
        assert!(matches!(err, SagaError::StepRejected { step: StepKey::Revoke, .. }));

        eventually("sword restored", || async {
            harness.inventory.count_owned(&player(), &sword()).await == 1
        })
        .await;
        assert!(
            harness
                .bus
                .messages_with_key(PLAYER_TOPIC, "credit")
                .await
                .is_empty()
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn credit_failure_restores_inventory() {
        let harness = TestHarness::new().await;
        harness.deposit(&player(), 100).await;
        let bought = harness.buy(&player(), &[("sword", 1)]).await.unwrap();
        harness.ledger.set_unavailable(true).await;

        let err = harness.sell(&player(), &[("sword", 1)]).await.unwrap_err();
        assert!(matches!(err, SagaError::StepRejected { step: StepKey::Credit, .. }));

        eventually("sword restored", || async {
            harness.inventory.count_owned(&player(), &sword()).await == 1
        })
        .await;
        let owned = harness
            .inventory
            .find_player_items(&player())
            .await
            .unwrap();
        assert_eq!(Some(owned[0].inventory_id), bought.results[0].inventory_id);

        harness.ledger.set_unavailable(false).await;
        assert_eq!(harness.balance(&player()).await, Money::zero());

        harness.stop().await;
    }
}
