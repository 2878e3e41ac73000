//! # Gatekeeper Core
//!
//! Single bootstrap path that wires the coordination components from one
//! configuration:
//!
//! - authorization gate over the supplied [`AccessControlClient`]
//! - resource constraint queue and approval service, both notifying the
//!   supplied [`OrchestratorCallback`]
//! - step registry with the built-in steps registered
//! - dispatcher the orchestrator drives with `start` / `resume` / `abort`
//!
//! Storage is chosen by the entry point: [`GatekeeperCore::in_memory`] for an
//! embedded single-process deployment, [`GatekeeperCore::from_config`] for
//! Postgres.

use crate::approvals::{ApprovalService, ApprovalStore, ApprovalSweeper, InMemoryApprovalStore};
use crate::authorization::{AccessControlClient, AuthorizationGate};
use crate::config::ConfigManager;
use crate::constraints::{ConstraintStore, InMemoryConstraintStore, ResourceConstraintQueue};
use crate::error::GatekeeperResult;
use crate::events::EventPublisher;
use crate::execution::callback::OrchestratorCallback;
use crate::execution::continuation::{ContinuationStore, InMemoryContinuationStore};
use crate::execution::dispatcher::StepDispatcher;
use crate::registry::StepRegistry;
use crate::steps::register_builtin_steps;
use crate::utils::clock::{Clock, SystemClock};
use std::sync::Arc;
use tracing::info;

/// Storage backends for the coordination state
#[derive(Debug, Clone)]
pub struct CoreStores {
    pub constraints: Arc<dyn ConstraintStore>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub continuations: Arc<dyn ContinuationStore>,
}

impl CoreStores {
    pub fn in_memory() -> Self {
        Self {
            constraints: Arc::new(InMemoryConstraintStore::new()),
            approvals: Arc::new(InMemoryApprovalStore::new()),
            continuations: Arc::new(InMemoryContinuationStore::new()),
        }
    }

    /// Postgres-backed constraint lanes and approvals. Continuations stay in
    /// process memory.
    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::database::{PgApprovalStore, PgConstraintStore};

        Self {
            constraints: Arc::new(PgConstraintStore::new(pool.clone())),
            approvals: Arc::new(PgApprovalStore::new(pool)),
            continuations: Arc::new(InMemoryContinuationStore::new()),
        }
    }
}

/// Wired coordination components
#[derive(Debug, Clone)]
pub struct GatekeeperCore {
    pub config_manager: Arc<ConfigManager>,
    pub event_publisher: EventPublisher,
    pub registry: Arc<StepRegistry>,
    pub gate: Arc<AuthorizationGate>,
    pub constraint_queue: Arc<ResourceConstraintQueue>,
    pub approvals: Arc<ApprovalService>,
    pub dispatcher: Arc<StepDispatcher>,
}

impl GatekeeperCore {
    /// Core with process-local storage
    pub fn in_memory(
        config_manager: Arc<ConfigManager>,
        access_client: Arc<dyn AccessControlClient>,
        callback: Arc<dyn OrchestratorCallback>,
    ) -> GatekeeperResult<Self> {
        Self::from_parts(
            config_manager,
            CoreStores::in_memory(),
            access_client,
            callback,
            Arc::new(SystemClock),
        )
    }

    /// Core backed by the Postgres database named in the configuration
    #[cfg(feature = "postgres")]
    pub async fn from_config(
        config_manager: Arc<ConfigManager>,
        access_client: Arc<dyn AccessControlClient>,
        callback: Arc<dyn OrchestratorCallback>,
    ) -> GatekeeperResult<Self> {
        crate::logging::init_structured_logging();
        let db = crate::database::DatabaseConnection::connect(&config_manager.config().database).await?;
        Self::from_parts(
            config_manager,
            CoreStores::postgres(db.pool().clone()),
            access_client,
            callback,
            Arc::new(SystemClock),
        )
    }

    pub fn from_parts(
        config_manager: Arc<ConfigManager>,
        stores: CoreStores,
        access_client: Arc<dyn AccessControlClient>,
        callback: Arc<dyn OrchestratorCallback>,
        clock: Arc<dyn Clock>,
    ) -> GatekeeperResult<Self> {
        let config = config_manager.config();
        config.validate()?;

        let event_publisher = EventPublisher::from_config(&config.events);

        let gate = Arc::new(
            AuthorizationGate::new(access_client, &config.auth)
                .with_event_publisher(event_publisher.clone()),
        );

        let constraint_queue = Arc::new(
            ResourceConstraintQueue::new(stores.constraints, &config.constraints, event_publisher.clone())
                .with_callback(callback.clone()),
        );

        let approvals = Arc::new(
            ApprovalService::new(stores.approvals, &config.approvals, event_publisher.clone())
                .with_callback(callback)
                .with_clock(clock),
        );

        let registry = Arc::new(StepRegistry::new());
        register_builtin_steps(&registry, constraint_queue.clone(), approvals.clone())?;

        let dispatcher = Arc::new(StepDispatcher::new(
            registry.clone(),
            gate.clone(),
            stores.continuations,
            event_publisher.clone(),
        ));

        info!(
            environment = config_manager.environment(),
            auth_enabled = gate.is_enabled(),
            step_types = registry.stats().total_steps,
            "Gatekeeper core initialized"
        );

        Ok(Self {
            config_manager,
            event_publisher,
            registry,
            gate,
            constraint_queue,
            approvals,
            dispatcher,
        })
    }

    /// Expiry sweeper over this core's approval service
    pub fn sweeper(&self) -> ApprovalSweeper {
        ApprovalSweeper::new(self.approvals.clone())
    }
}
