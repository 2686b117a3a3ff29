//! Constraint registration with fact fetching.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ReteResult;
use crate::expr::validation::validate_constraint;
use crate::expr::Constraint;
use crate::extract::requirements;
use crate::fact::Fact;
use crate::network::ProductionId;
use crate::runtime::NetworkHandle;

use super::fetcher::ChainFetcher;

/// Outcome of [`ChainAwareNetwork::add_constraint_with_facts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintRegistration {
    pub production_id: ProductionId,
    /// Required facts that were fetched and fed into the network.
    pub fetched_facts: Vec<Fact>,
    /// The block fact fed after the required facts. `None` only when the
    /// fetcher reported an error instead of a default.
    pub block: Option<Fact>,
    /// Constraints for the same permission that were removed first.
    pub replaced_constraints: Vec<ProductionId>,
    /// Activation state once every fetched fact has propagated.
    pub activated: bool,
}

/// A network handle paired with a fetcher.
#[derive(Clone)]
pub struct ChainAwareNetwork {
    handle: NetworkHandle,
    fetcher: Arc<dyn ChainFetcher>,
}

impl std::fmt::Debug for ChainAwareNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAwareNetwork")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ChainAwareNetwork {
    pub fn new(handle: NetworkHandle, fetcher: Arc<dyn ChainFetcher>) -> Self {
        Self { handle, fetcher }
    }

    pub const fn handle(&self) -> &NetworkHandle {
        &self.handle
    }

    pub fn fetcher(&self) -> &dyn ChainFetcher {
        self.fetcher.as_ref()
    }

    /// Register `constraint`, replacing any constraint already registered for
    /// its permission, then fetch every fact it requires plus the current
    /// block and feed them in.
    ///
    /// A fact that cannot be fetched is logged and skipped. Errors are
    /// returned only for an invalid constraint or an unreachable network.
    pub async fn add_constraint_with_facts(
        &self,
        constraint: Constraint,
    ) -> ReteResult<ConstraintRegistration> {
        validate_constraint(&constraint)?;

        let mut replaced_constraints = Vec::new();
        let existing = self
            .handle
            .constraints_by_permission(constraint.perm_id.clone())
            .await?;
        for id in existing {
            if self.handle.remove_constraint(id.clone()).await? {
                info!(production_id = %id, perm_id = %constraint.perm_id, "replaced existing constraint");
                replaced_constraints.push(id);
            }
        }

        let required = requirements(&constraint).facts;
        let perm_id = constraint.perm_id.clone();
        let production_id = self.handle.add_constraint(constraint).await?;

        let mut fetched_facts = Vec::with_capacity(required.len());
        for requirement in &required {
            match self.fetcher.fetch_requirement(requirement, &perm_id).await {
                Ok(fact) => {
                    self.handle.add_fact(fact.clone()).await?;
                    fetched_facts.push(fact);
                }
                Err(e) => {
                    warn!(
                        entity = %requirement.entity_key(),
                        error = %e,
                        "failed to fetch required fact, skipping"
                    );
                }
            }
        }

        let block = match self.fetcher.fetch_current_block().await {
            Ok(fact) => {
                self.handle.add_fact(fact.clone()).await?;
                Some(fact)
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch current block");
                None
            }
        };

        let activated = self
            .handle
            .is_constraint_activated(production_id.clone())
            .await?;
        info!(
            production_id = %production_id,
            perm_id = %perm_id,
            fetched = fetched_facts.len(),
            required = required.len(),
            activated,
            "registered constraint with chain facts"
        );

        Ok(ConstraintRegistration {
            production_id,
            fetched_facts,
            block,
            replaced_constraints,
            activated,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::ChainError;
    use crate::expr::{AccountId, BoolExpr, NumExpr, PermId, UInt};
    use crate::network::ReteNetwork;
    use crate::runtime::NetworkRuntime;

    /// Fixed answers; stake lookups for "broken" fail outright.
    struct FixedFetcher;

    #[async_trait]
    impl ChainFetcher for FixedFetcher {
        async fn fetch_stake_of(&self, account: &AccountId) -> Result<Fact, ChainError> {
            if account.as_str() == "broken" {
                return Err(ChainError::Connection {
                    message: "down".to_string(),
                });
            }
            Ok(Fact::stake_of(account.clone(), Some(1500)))
        }

        async fn fetch_permission_exists(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
            Ok(Fact::permission_exists(perm_id.clone(), Some(true)))
        }

        async fn fetch_permission_enabled(&self, perm_id: &PermId) -> Result<Fact, ChainError> {
            Ok(Fact::permission_enabled(perm_id.clone(), Some(true)))
        }

        /// Redelegated only under permission "p".
        async fn fetch_inactive_unless_redelegated(
            &self,
            account: &AccountId,
            percentage: UInt,
            perm_id: &PermId,
        ) -> Result<Fact, ChainError> {
            Ok(Fact::inactive_unless_redelegated(
                account.clone(),
                percentage,
                Some(perm_id.as_str() == "p"),
            ))
        }

        async fn fetch_outgoing_redelegation(
            &self,
            account: &AccountId,
            percentage: UInt,
        ) -> Result<Fact, ChainError> {
            Ok(Fact::inactive_unless_redelegated(account.clone(), percentage, Some(false)))
        }

        async fn fetch_current_block(&self) -> Result<Fact, ChainError> {
            Ok(Fact::block(1000, 1))
        }
    }

    fn start() -> (NetworkRuntime, ChainAwareNetwork) {
        let rt = NetworkRuntime::start(ReteNetwork::new(), &RuntimeConfig::default());
        let aware = ChainAwareNetwork::new(rt.handle(), Arc::new(FixedFetcher));
        (rt, aware)
    }

    #[tokio::test]
    async fn fetches_required_facts_and_block() {
        let (_rt, aware) = start();
        let reg = aware
            .add_constraint_with_facts(Constraint::new(
                "p",
                BoolExpr::and(
                    BoolExpr::gt(NumExpr::stake_of("alice"), NumExpr::literal(1000)),
                    BoolExpr::permission_exists("p"),
                ),
            ))
            .await
            .unwrap();

        assert_eq!(reg.fetched_facts.len(), 2);
        assert_eq!(reg.block, Some(Fact::block(1000, 1)));
        assert!(reg.replaced_constraints.is_empty());
        assert!(reg.activated);
    }

    #[tokio::test]
    async fn redelegation_is_fetched_for_the_constraint_permission() {
        let (_rt, aware) = start();
        let granted = aware
            .add_constraint_with_facts(Constraint::new("p", BoolExpr::inactive_unless_redelegated("a", 50)))
            .await
            .unwrap();
        assert!(granted.activated);
        assert_eq!(
            granted.fetched_facts,
            vec![Fact::inactive_unless_redelegated("a", 50, Some(true))]
        );

        let other = aware
            .add_constraint_with_facts(Constraint::new("q", BoolExpr::inactive_unless_redelegated("b", 50)))
            .await
            .unwrap();
        assert!(!other.activated);
    }

    #[tokio::test]
    async fn failed_fetch_is_skipped() {
        let (_rt, aware) = start();
        let reg = aware
            .add_constraint_with_facts(Constraint::new(
                "p",
                BoolExpr::gt(NumExpr::stake_of("broken"), NumExpr::literal(0)),
            ))
            .await
            .unwrap();
        assert!(reg.fetched_facts.is_empty());
        assert!(!reg.activated);
    }

    #[tokio::test]
    async fn invalid_constraint_keeps_existing_registration() {
        let (_rt, aware) = start();
        let first = aware
            .add_constraint_with_facts(Constraint::new("p", BoolExpr::permission_exists("p")))
            .await
            .unwrap();

        let err = aware
            .add_constraint_with_facts(Constraint::new("p", BoolExpr::inactive_unless_redelegated("a", 101)))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let ids = aware
            .handle()
            .constraints_by_permission(PermId::new("p"))
            .await
            .unwrap();
        assert_eq!(ids, vec![first.production_id]);
    }
}
