use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Bytes;
use eyre::Result;

use super::*;
use crate::aggregator::{PipelineEvent, SummaryAggregator};
use crate::capability::{EventDetails, ReleaseQuery, ReleaseReceipt, SwapReceipt, WalletCapability};
use crate::error::GatewayError;
use crate::fees::VaultFees;
use crate::hash::{derive_credit_processor_address, solana_proposal_address};
use crate::registry::{PipelineKey, PipelineRegistry, RouteMode};
use crate::route::TransferRoute;
use crate::testing::fixtures::*;
use crate::testing::*;
use crate::topology::{CreditPipeline, DoubleHopPipeline, InboundPipeline, OutboundPipeline};
use crate::types::{
    ApproveStatus, CreditProcessorState, PendingWithdrawal, PendingWithdrawalId, PhaseStatus,
    Topology, WithdrawalStatus,
};

fn event(status: PhaseStatus, round_number: u32) -> EventDetails {
    EventDetails {
        status,
        round_number,
        confirms: 2,
        rejects: 0,
        required_votes: 2,
        signatures: vec![Bytes::from(vec![0x51; 65]), Bytes::from(vec![0x52; 65])],
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

fn released() -> ReleaseReceipt {
    ReleaseReceipt {
        is_released: true,
        tx_id: Some("release-tx".into()),
    }
}

fn evm_tvm(world: &TestWorld) -> Arc<InboundPipeline> {
    Arc::new(InboundPipeline::evm_tvm(
        PipelineKey::new(Topology::EvmTvm, evm_identity()),
        evm_network(),
        hub_network(),
        world.deps.clone(),
    ))
}

fn tvm_evm(world: &TestWorld) -> Result<Arc<OutboundPipeline>> {
    Ok(Arc::new(OutboundPipeline::tvm_evm(
        PipelineKey::new(Topology::TvmEvm, tvm_identity()),
        hub_network(),
        evm_network(),
        world.deps.clone(),
    )?))
}

async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_init_is_idempotent_and_dispose_releases_subscriptions() {
    let world = TestWorld::new();
    let pipeline = evm_tvm(&world);

    let disposer = pipeline.clone().init();
    assert!(wait_for(|| disposer.active_subscriptions() == 2).await);
    let again = pipeline.clone().init();
    assert_eq!(again.active_subscriptions(), 2);
    assert_eq!(world.evm.calls("subscribe"), 1);
    assert_eq!(world.hub.calls("subscribe"), 1);
    assert_eq!(world.evm.active_subscriptions(), 1);
    assert_eq!(world.hub.active_subscriptions(), 1);

    pipeline.dispose();
    pipeline.dispose();
    assert!(disposer.is_disposed());
    assert_eq!(world.evm.active_subscriptions(), 0);
    assert_eq!(world.hub.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_polling_reports_unindexed_deposit_without_halting() {
    let world = TestWorld::new();
    let pipeline = evm_tvm(&world);

    let _disposer = pipeline.clone().init();
    assert!(wait_for(|| world.reporter.count("refresh") > 0).await);
    assert!(pipeline.halted().is_none());
    pipeline.dispose();
}

#[tokio::test]
async fn test_registry_reuses_running_pipeline() -> Result<()> {
    let world = TestWorld::new();
    let registry = PipelineRegistry::new(world.deps.clone());
    let route = TransferRoute {
        from: evm_network(),
        to: hub_network(),
        identity: evm_identity(),
    };
    let mut events = world.bus.subscribe();

    let first = registry.enter(&route, RouteMode::Direct)?;
    let second = registry.enter(&route, RouteMode::Direct)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);

    let credit = registry.enter(&route, RouteMode::Credit)?;
    assert_eq!(credit.key().topology, Topology::Credit);
    assert_eq!(registry.len(), 2);

    let key = first.key().clone();
    assert!(registry.leave(&key));
    assert!(!registry.leave(&key));
    assert!(registry.get(&key).is_none());

    let mut disposed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PipelineEvent::Disposed(ref k) if *k == key) {
            disposed = true;
        }
    }
    assert!(disposed);

    registry.dispose_all();
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_refresh_after_leave_does_not_resurrect_summary() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(105);
    let registry = PipelineRegistry::new(world.deps.clone());
    let route = TransferRoute {
        from: evm_network(),
        to: hub_network(),
        identity: evm_identity(),
    };
    let mut events = world.bus.subscribe();

    let pipeline = registry.enter(&route, RouteMode::Direct)?;
    let key = pipeline.key().to_string();
    pipeline.refresh().await?;
    assert!(registry.leave(pipeline.key()));
    // A tick already in flight when the pipeline was dropped
    pipeline.refresh().await?;

    let aggregator = SummaryAggregator::new();
    while let Ok(event) = events.try_recv() {
        aggregator.apply(event).await;
    }
    assert!(aggregator.get(&key).await.is_none());
    assert!(aggregator.list().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_registry_rejects_route_without_gateway() {
    let world = TestWorld::new();
    let registry = PipelineRegistry::new(world.deps.clone());
    let route = TransferRoute {
        from: crate::types::NetworkId::evm("999"),
        to: hub_network(),
        identity: evm_identity(),
    };
    let err = registry.enter(&route, RouteMode::Direct).err();
    assert!(matches!(err, Some(PipelineError::NoGateway(_))));
    assert!(registry.is_empty());
}

// ============================================================================
// Prepare guards
// ============================================================================

#[tokio::test]
async fn test_prepare_skips_unconfirmed_source_without_calls() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(105);
    let pipeline = evm_tvm(&world);

    pipeline.refresh().await?;
    assert_phase("transfer", pipeline.transfer_state().status, PhaseStatus::Pending)?;
    assert_eq!(pipeline.transfer_state().confirmed_blocks_count, 5);

    assert_skipped(&pipeline.prepare().await, SkipReason::SourceNotConfirmed)?;
    assert_calls("deploy_event", world.hub.calls("deploy_event"), 0)?;
    Ok(())
}

#[tokio::test]
async fn test_zero_confirmation_depth_confirms_source() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.hub.set_blocks_to_confirm(0);
    world.evm.set_latest_block(200);
    let pipeline = evm_tvm(&world);

    pipeline.refresh().await?;
    let transfer = pipeline.transfer_state();
    assert_phase("transfer", transfer.status, PhaseStatus::Confirmed)?;
    assert_eq!(transfer.event_blocks_to_confirm, Some(0));

    assert_submitted(&pipeline.prepare().await)?;
    assert_calls("deploy_event", world.hub.calls("deploy_event"), 1)?;
    Ok(())
}

#[tokio::test]
async fn test_prepare_skips_while_pending_or_confirmed() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    assert_submitted(&pipeline.prepare().await)?;
    assert_skipped(&pipeline.prepare().await, SkipReason::AlreadyInProgress)?;

    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    pipeline.refresh().await?;
    assert_skipped(&pipeline.prepare().await, SkipReason::AlreadyConfirmed)?;
    assert_calls("deploy_event", world.hub.calls("deploy_event"), 1)?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_prepare_submits_once() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    world.hub.set_latency(Duration::from_millis(250));
    let (a, b) = tokio::join!(pipeline.prepare(), pipeline.prepare());
    let submitted = [&a, &b].iter().filter(|o| o.is_submitted()).count();
    assert_eq!(submitted, 1);
    assert!(a == ActionOutcome::Skipped(SkipReason::AlreadyInProgress)
        || b == ActionOutcome::Skipped(SkipReason::AlreadyInProgress));
    assert_eq!(world.hub.deploy_requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_prepare_without_hub_wallet() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    world.tvm_wallet.disconnect().await?;
    assert_skipped(&pipeline.prepare().await, SkipReason::WalletNotConnected)?;
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Disabled)?;
    Ok(())
}

#[tokio::test]
async fn test_failed_prepare_rolls_back_and_reports() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    world
        .hub
        .fail("deploy_event", GatewayError::Timeout("deploy".into()));
    assert_failed(&pipeline.prepare().await)?;
    let prepare = pipeline.prepare_state();
    assert_phase("prepare", prepare.status, PhaseStatus::Disabled)?;
    assert!(!prepare.is_deploying);
    assert_eq!(world.reporter.count("prepare"), 1);
    assert!(pipeline.halted().is_none());

    world.hub.clear_failure("deploy_event");
    assert_submitted(&pipeline.prepare().await)?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_gateway_halts_pipeline() -> Result<()> {
    let world = TestWorld::new();
    world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    world
        .hub
        .fail("deploy_event", GatewayError::Unsupported("deploy_event".into()));
    assert_failed(&pipeline.prepare().await)?;
    assert!(pipeline.halted().is_some());

    world.hub.clear_failure("deploy_event");
    assert_skipped(&pipeline.prepare().await, SkipReason::Halted)?;
    assert_eq!(pipeline.summary().error, pipeline.halted());
    Ok(())
}

#[tokio::test]
async fn test_unknown_token_is_a_configuration_error() -> Result<()> {
    let world = TestWorld::new();
    let mut receipt = deposit(evm_vote(), 100, 1_000, EVM_OWNER, TVM_OWNER);
    receipt.token_root = crate::address::TvmAddress::new(0, [0x99; 32]);
    world.evm.add_deposit(evm_identity(), receipt);
    let pipeline = evm_tvm(&world);

    let err = pipeline.refresh().await.err();
    let Some(err) = err else {
        return Err(eyre::eyre!("refresh should fail for an unrouted token"));
    };
    assert!(err.is_fatal());
    pipeline.on_error("refresh", &err);
    assert!(pipeline.halted().is_some());
    Ok(())
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_only_for_stuck_outdated_event() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;
    assert_submitted(&pipeline.prepare().await)?;

    world.hub.set_event(event_address, event(PhaseStatus::Pending, 1));
    pipeline.refresh().await?;
    assert_skipped(&pipeline.broadcast().await, SkipReason::NotStuck)?;

    world.hub.set_round(2);
    world.evm.set_latest_block(136);
    pipeline.refresh().await?;
    assert!(pipeline.prepare_state().is_outdated);
    assert_skipped(&pipeline.broadcast().await, SkipReason::NotStuck)?;

    world.evm.set_latest_block(137);
    pipeline.refresh().await?;
    assert_submitted(&pipeline.broadcast().await)?;
    assert!(!pipeline.prepare_state().is_broadcasting);
    assert_eq!(world.hub.deploy_requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_broadcast_honours_stuck_multiplier_setting() -> Result<()> {
    let world = TestWorld::with_settings(crate::config::PipelineSettings {
        stuck_multiplier: 1,
        ..crate::config::PipelineSettings::default()
    });
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(113);
    world.hub.set_event(event_address, event(PhaseStatus::Pending, 1));
    world.hub.set_round(3);
    let pipeline = evm_tvm(&world);
    pipeline.refresh().await?;

    assert_submitted(&pipeline.broadcast().await)?;
    Ok(())
}

// ============================================================================
// Topologies
// ============================================================================

#[tokio::test]
async fn test_evm_to_tvm_end_to_end() -> Result<()> {
    init_tracing();
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    world.evm.set_vault_fees(VaultFees {
        deposit_bps: 30,
        withdraw_bps: 0,
    });
    let pipeline = evm_tvm(&world);

    pipeline.refresh().await?;
    assert_eq!(pipeline.fees().deposit_fee, Some(4_500));
    let summary = pipeline.summary();
    assert_eq!(summary.amount.as_deref(), Some("1.500000"));
    assert_eq!(summary.event_address, Some(event_address));

    assert_submitted(&pipeline.prepare().await)?;
    let requests = world.hub.deploy_requests();
    assert_eq!(requests[0].configuration, evm_configuration());
    assert_eq!(requests[0].sender, TVM_OWNER);

    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    pipeline.refresh().await?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Pending)?;

    world
        .hub
        .set_release(ReleaseQuery::Hub { event: event_address }, released());
    pipeline.refresh().await?;
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Confirmed)?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Confirmed)?;
    assert!(pipeline.release_state().is_released);
    assert_skipped(&pipeline.release().await, SkipReason::NotApplicable)?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_event_rejects_release() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    world.hub.set_event(event_address, event(PhaseStatus::Rejected, 1));
    let pipeline = evm_tvm(&world);

    pipeline.refresh().await?;
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Rejected)?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Rejected)?;
    assert_skipped(&pipeline.prepare().await, SkipReason::Rejected)?;
    Ok(())
}

#[tokio::test]
async fn test_tvm_to_evm_release_and_bounty() -> Result<()> {
    init_tracing();
    let world = TestWorld::new();
    let event_address = world.seed_hub_deposit(tvm_identity(), evm_configuration());
    world.hub.set_latest_block(112);
    world.evm.set_vault_fees(VaultFees {
        deposit_bps: 0,
        withdraw_bps: 50,
    });
    world.evm.set_vault_balance(5_000_000);
    let pipeline = tvm_evm(&world)?;

    pipeline.refresh().await?;
    assert_eq!(pipeline.fees().withdraw_fee, Some(10_000));
    assert_eq!(pipeline.summary().vault_balance.as_deref(), Some("5.000000"));
    assert_skipped(&pipeline.release().await, SkipReason::EventNotConfirmed)?;

    assert_submitted(&pipeline.prepare().await)?;
    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    pipeline.refresh().await?;
    let Some(withdrawal_id) = pipeline.leg().target().and_then(|t| t.withdrawal_id()) else {
        return Err(eyre::eyre!("release target not resolved"));
    };

    assert_submitted(&pipeline.release().await)?;
    let requests = world.evm.release_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, ReleaseQuery::Evm { withdrawal_id });
    assert_eq!(requests[0].signatures.len(), 2);
    assert_eq!(requests[0].sender, EVM_OWNER);
    assert_skipped(&pipeline.release().await, SkipReason::AlreadyInProgress)?;

    world.evm.set_pending_withdrawal(
        withdrawal_id,
        PendingWithdrawal {
            id: PendingWithdrawalId {
                recipient: EVM_OWNER.into(),
                id: 4,
            },
            amount: 1_990_000,
            bounty: 0,
            recipient: EVM_OWNER.into(),
            approve_status: ApproveStatus::NotRequired,
            status: WithdrawalStatus::Open,
        },
    );
    pipeline.refresh().await?;
    assert_eq!(pipeline.pending_withdrawals().len(), 1);
    assert_eq!(pipeline.summary().pending_withdrawals.len(), 1);

    assert!(matches!(
        pipeline.set_bounty("2").await,
        Err(crate::withdrawals::BountyRejection::ExceedsAmount { .. })
    ));
    pipeline.set_bounty("0.5").await?;
    let bounties = world.hub.bounty_requests();
    assert_eq!(bounties.len(), 1);
    assert_eq!(bounties[0].bounty, 500_000);
    assert_eq!(bounties[0].withdrawal.as_ref().map(|w| w.id), Some(4));
    assert_eq!(bounties[0].withdrawal_hash, withdrawal_id);

    world
        .evm
        .set_release(ReleaseQuery::Evm { withdrawal_id }, released());
    pipeline.refresh().await?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Confirmed)?;
    Ok(())
}

#[tokio::test]
async fn test_failed_release_rolls_back() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_hub_deposit(tvm_identity(), evm_configuration());
    world.hub.set_latest_block(112);
    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    let pipeline = tvm_evm(&world)?;
    pipeline.refresh().await?;

    world
        .evm
        .fail("submit_release", GatewayError::Rejected("out of gas".into()));
    assert_failed(&pipeline.release().await)?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Disabled)?;
    assert_eq!(world.reporter.count("release"), 1);
    assert!(pipeline.halted().is_none());
    Ok(())
}

#[tokio::test]
async fn test_solana_to_tvm_provisions_token_wallet_first() -> Result<()> {
    let world = TestWorld::new();
    world.seed_solana_deposit();
    world.solana.set_latest_block(112);
    let pipeline = Arc::new(InboundPipeline::solana_tvm(
        PipelineKey::new(Topology::SolanaTvm, solana_identity()),
        solana_network(),
        hub_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    assert_eq!(pipeline.fees().deposit_fee, None);
    assert_submitted(&pipeline.prepare().await)?;
    let wallets = world.hub.token_wallet_requests();
    assert_eq!(wallets.len(), 1);
    assert_eq!(wallets[0].owner, TVM_OWNER);
    assert_eq!(wallets[0].token, token_root().to_string());
    assert!(pipeline.prepare_state().is_token_deploying);
    assert_skipped(&pipeline.prepare().await, SkipReason::AlreadyInProgress)?;
    assert_calls("deploy_event", world.hub.calls("deploy_event"), 0)?;

    world.hub.add_token_wallet(TVM_OWNER, &token_root().to_string());
    pipeline.refresh().await?;
    assert!(!pipeline.prepare_state().is_token_deploying);
    assert_submitted(&pipeline.prepare().await)?;
    assert_eq!(world.hub.deploy_requests()[0].configuration, solana_configuration());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lost_token_wallet_deploy_can_be_resubmitted() -> Result<()> {
    let world = TestWorld::with_settings(crate::config::PipelineSettings {
        token_deploy_timeout: Duration::from_secs(30),
        ..crate::config::PipelineSettings::default()
    });
    world.seed_solana_deposit();
    world.solana.set_latest_block(112);
    let pipeline = Arc::new(InboundPipeline::solana_tvm(
        PipelineKey::new(Topology::SolanaTvm, solana_identity()),
        solana_network(),
        hub_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    assert_submitted(&pipeline.prepare().await)?;
    for _ in 0..10 {
        pipeline.refresh().await?;
    }
    assert!(pipeline.prepare_state().is_token_deploying);
    assert_skipped(&pipeline.prepare().await, SkipReason::AlreadyInProgress)?;

    // The wallet never appears; the next tick past the timeout drops the flag
    tokio::time::advance(Duration::from_secs(31)).await;
    pipeline.refresh().await?;
    assert!(!pipeline.prepare_state().is_token_deploying);

    assert_submitted(&pipeline.prepare().await)?;
    assert_eq!(world.hub.token_wallet_requests().len(), 2);
    assert!(pipeline.prepare_state().is_token_deploying);
    assert_calls("deploy_event", world.hub.calls("deploy_event"), 0)?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_account_create_retried_on_release() -> Result<()> {
    let world = TestWorld::with_settings(crate::config::PipelineSettings {
        token_deploy_timeout: Duration::from_secs(30),
        ..crate::config::PipelineSettings::default()
    });
    let event_address = world.seed_hub_deposit(tvm_identity(), solana_configuration());
    world.hub.set_latest_block(112);
    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    let pipeline = Arc::new(OutboundPipeline::tvm_solana(
        PipelineKey::new(Topology::TvmSolana, tvm_identity()),
        hub_network(),
        solana_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    assert_submitted(&pipeline.release().await)?;
    assert_skipped(&pipeline.release().await, SkipReason::AlreadyInProgress)?;

    // No tick needed: the explicit retry reclaims the expired create
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_submitted(&pipeline.release().await)?;
    assert_eq!(world.solana.token_wallet_requests().len(), 2);
    assert!(world.solana.release_requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_tvm_to_solana_release_proposal() -> Result<()> {
    init_tracing();
    let world = TestWorld::new();
    let event_address = world.seed_hub_deposit(tvm_identity(), solana_configuration());
    world.hub.set_latest_block(112);
    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    let pipeline = Arc::new(OutboundPipeline::tvm_solana(
        PipelineKey::new(Topology::TvmSolana, tvm_identity()),
        hub_network(),
        solana_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    let program = solana_sdk::pubkey::Pubkey::from_str(SOLANA_PROGRAM)?;
    let proposal = solana_proposal_address(&program, 1, &event_address).to_string();
    let expected = ReleaseQuery::Solana { proposal };
    assert_eq!(pipeline.leg().target().map(|t| t.query), Some(expected.clone()));

    assert_submitted(&pipeline.release().await)?;
    assert_eq!(world.solana.token_wallet_requests().len(), 1);
    assert!(world.solana.release_requests().is_empty());

    let token = "So11111111111111111111111111111111111111112";
    world.solana.add_token_wallet(EVM_OWNER, token);
    pipeline.refresh().await?;
    assert_submitted(&pipeline.release().await)?;
    let requests = world.solana.release_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, expected);
    assert_eq!(requests[0].sender, SOLANA_OWNER);

    world.solana.set_release(expected, released());
    pipeline.refresh().await?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Confirmed)?;
    assert!(pipeline.set_bounty("1").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_credit_phases_follow_processor() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    let processor = derive_credit_processor_address(&event_address);
    let pipeline = Arc::new(CreditPipeline::new(
        PipelineKey::new(Topology::Credit, evm_identity()),
        evm_network(),
        hub_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    assert_eq!(pipeline.credit_processor_state(), None);
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Disabled)?;

    world
        .hub
        .set_credit_processor(processor, CreditProcessorState::EventDeployInProgress);
    world.hub.set_event(event_address, event(PhaseStatus::Pending, 1));
    world.hub.set_round(2);
    pipeline.refresh().await?;
    let prepare = pipeline.prepare_state();
    assert_phase("prepare", prepare.status, PhaseStatus::Pending)?;
    assert!(prepare.is_deployed);
    assert!(prepare.is_outdated);

    world
        .hub
        .set_credit_processor(processor, CreditProcessorState::SwapInProgress);
    pipeline.refresh().await?;
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Confirmed)?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Pending)?;

    world
        .hub
        .set_credit_processor(processor, CreditProcessorState::Processed);
    pipeline.refresh().await?;
    assert!(pipeline.release_state().is_released);
    assert_eq!(
        pipeline.summary().credit_processor,
        Some(CreditProcessorState::Processed)
    );
    Ok(())
}

#[tokio::test]
async fn test_credit_rejected_event() -> Result<()> {
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    world.hub.set_credit_processor(
        derive_credit_processor_address(&event_address),
        CreditProcessorState::EventRejected,
    );
    let pipeline = Arc::new(CreditPipeline::new(
        PipelineKey::new(Topology::Credit, evm_identity()),
        evm_network(),
        hub_network(),
        world.deps.clone(),
    ));

    pipeline.refresh().await?;
    assert_phase("prepare", pipeline.prepare_state().status, PhaseStatus::Rejected)?;
    assert_phase("release", pipeline.release_state().status, PhaseStatus::Rejected)?;
    Ok(())
}

#[tokio::test]
async fn test_double_hop_attaches_second_leg() -> Result<()> {
    init_tracing();
    let world = TestWorld::new();
    let event_address = world.seed_evm_deposit();
    world.evm.set_latest_block(112);
    world.hub.set_latest_block(112);
    world.evm.set_vault_fees(VaultFees {
        deposit_bps: 30,
        withdraw_bps: 0,
    });
    world.evm2.set_vault_fees(VaultFees {
        deposit_bps: 0,
        withdraw_bps: 50,
    });
    let key = PipelineKey::new(Topology::EvmEvm, evm_identity());
    let pipeline = Arc::new(DoubleHopPipeline::new(
        key.clone(),
        evm_network(),
        evm2_network(),
        world.deps.clone(),
    ));
    let mut events = world.bus.subscribe();

    pipeline.refresh().await?;
    assert_eq!(pipeline.summary().bridge_fee.as_deref(), Some("0.004500"));
    assert_submitted(&pipeline.prepare().await)?;

    world.hub.set_event(event_address, event(PhaseStatus::Confirmed, 1));
    world
        .hub
        .set_release(ReleaseQuery::Hub { event: event_address }, released());
    let next = crate::address::TvmAddress::new(0, [0xdd; 32]);
    world.hub.set_swap(
        event_address,
        SwapReceipt {
            status: PhaseStatus::Confirmed,
            next: Some(next),
        },
    );
    pipeline.refresh().await?;
    assert!(pipeline.second_pipeline().is_some());
    assert!(!pipeline.can_prepare_second());
    assert_skipped(&pipeline.prepare_second().await, SkipReason::NotApplicable)?;

    let Some(second) = pipeline.second() else {
        return Err(eyre::eyre!("second leg not attached"));
    };
    world.seed_hub_deposit(
        crate::address::TransferIdentity::TvmContract(next),
        evm2_configuration(),
    );
    second.refresh().await?;
    world.hub.set_round(2);
    pipeline.refresh().await?;
    assert!(pipeline.can_prepare_second());

    assert_submitted(&pipeline.prepare_second().await)?;
    assert_eq!(world.hub.deploy_requests()[1].configuration, evm2_configuration());

    let fees = pipeline.fees();
    assert_eq!(fees.deposit_fee, Some(4_500));
    assert_eq!(fees.second_withdraw_fee, Some(10_000));
    let summary = pipeline.summary();
    assert_eq!(summary.bridge_fee.as_deref(), Some("0.014500"));
    assert_eq!(summary.right, evm2_network());

    let aggregator = SummaryAggregator::new();
    while let Ok(event) = events.try_recv() {
        aggregator.apply(event).await;
    }
    let Some(merged) = aggregator.get(&key.to_string()).await else {
        return Err(eyre::eyre!("double hop summary missing"));
    };
    let child = merged.second.map(|s| s.parent);
    assert_eq!(child, Some(Some(key.to_string())));
    assert_eq!(aggregator.list().await.len(), 1);

    pipeline.dispose();
    Ok(())
}
