//! Distribution planning
//!
//! A plan is the full, not yet persisted answer to "who gets what" for a set
//! of sessions: aggregate → optional refinery conversion → largest-remainder
//! allocation → tax overlay. Plans are keyed by the sorted session set and
//! the output resource; the persistence layer refuses a second plan with the
//! same key unless explicitly overridden.

use crate::aggregation::{aggregate, ResourceFilter, Strategy};
use crate::allocation::{allocate, split_equally};
use crate::error::EntityKind;
use crate::matcher::{resolve_participants, resolve_resource_with};
use crate::models::{
    CatalogSnapshot, DirectorySnapshot, ResourceId, ResourceRef, SessionId, SessionSnapshot, Share,
    UserId,
};
use crate::normalize::AliasRules;
use crate::refinery::{convert_inputs, RecipeBook};
use crate::tax::{apply_tax_units, TaxSnapshot};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Read-only inputs shared by every planning call
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub catalog: &'a CatalogSnapshot,
    pub directory: &'a DirectorySnapshot,
    pub tax: &'a TaxSnapshot,
    pub aliases: &'a AliasRules,
    pub recipes: &'a RecipeBook,
}

impl<'a> EngineContext<'a> {
    pub fn resolve_resource(&self, raw: &str) -> ResourceRef {
        resolve_resource_with(raw, self.catalog, self.aliases)
    }

    fn require_resource(&self, raw: &str) -> Result<(ResourceId, ResourceRef)> {
        let resolved = self.resolve_resource(raw);
        match resolved.id {
            Some(id) => Ok((id, resolved)),
            None => Err(Error::UnresolvedEntity {
                kind: EntityKind::Resource,
                name: resolved.canonical_name,
            }),
        }
    }

    fn display_name(&self, user: UserId) -> String {
        self.directory
            .get(user)
            .map(|e| e.display_name().to_string())
            .unwrap_or_else(|| format!("user #{}", user))
    }

    /// Gross share → recorded line with the tax overlay applied
    pub fn line_for(&self, user: UserId, share: Share) -> DistributionLine {
        let taxed = apply_tax_units(share.0, self.tax.preference_for(user), &self.tax.config);
        DistributionLine {
            user_id: user,
            display_name: self.display_name(user),
            gross: share.0,
            tax: taxed.tax_amount,
            net: taxed.net_recorded,
        }
    }
}

/// Idempotency key: sorted, deduplicated sessions plus output resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionKey {
    session_ids: Vec<SessionId>,
    output_resource_id: ResourceId,
}

impl DistributionKey {
    pub fn new(session_ids: &[SessionId], output_resource_id: ResourceId) -> Self {
        let mut ids = session_ids.to_vec();
        ids.sort();
        ids.dedup();
        Self {
            session_ids: ids,
            output_resource_id,
        }
    }

    pub fn session_ids(&self) -> &[SessionId] {
        &self.session_ids
    }

    pub fn output_resource_id(&self) -> ResourceId {
        self.output_resource_id
    }
}

impl fmt::Display for DistributionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sessions: Vec<String> = self.session_ids.iter().map(|s| s.to_string()).collect();
        write!(f, "sessions={};resource={}", sessions.join(","), self.output_resource_id)
    }
}

/// One recipient's recorded amounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLine {
    pub user_id: UserId,
    pub display_name: String,
    pub gross: u64,
    pub tax: u64,
    pub net: u64,
}

/// Multi-session distribution request, as submitted by an officer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub session_ids: Vec<SessionId>,
    /// Free-text name of the collected resource
    pub resource: String,
    pub strategy: Strategy,
    /// Recipe to run the collected total through before splitting
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default)]
    pub discounted: bool,
}

/// Fully computed distribution, ready to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub key: DistributionKey,
    pub input_resource: ResourceRef,
    pub output_resource: ResourceRef,
    pub strategy_used: Option<Strategy>,
    pub recipe: Option<String>,
    pub discounted: bool,
    pub total_input: u64,
    /// Input left unrefined after the last whole batch
    pub leftover_input: u64,
    pub total_distributed: u64,
    pub lines: Vec<DistributionLine>,
}

impl DistributionPlan {
    pub fn total_tax(&self) -> u64 {
        self.lines.iter().map(|l| l.tax).sum()
    }

    pub fn total_net(&self) -> u64 {
        self.lines.iter().map(|l| l.net).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Plan a distribution over previously fetched session rows
pub fn plan_distribution(
    request: &DistributionRequest,
    sessions: &SessionSnapshot,
    ctx: &EngineContext<'_>,
) -> Result<DistributionPlan> {
    if request.session_ids.is_empty() {
        return Err(Error::InvalidInput("No sessions selected".to_string()));
    }

    let (input_id, input_resource) = ctx.require_resource(&request.resource)?;
    let filter = ResourceFilter::by_ids([input_id]);
    let aggregated = aggregate(sessions, &request.session_ids, &filter, request.strategy);

    let (output_id, output_resource, total, leftover_input) = match &request.recipe {
        Some(name) => {
            let recipe = ctx
                .recipes
                .find(name)
                .ok_or_else(|| Error::AmbiguousRecipe(format!("Unknown recipe '{}'", name)))?;
            if !recipe.is_single_input() {
                return Err(Error::AmbiguousRecipe(format!(
                    "'{}' needs {} inputs and cannot be planned from one resource",
                    recipe.name,
                    recipe.inputs.len()
                )));
            }
            let outcome = convert_inputs(
                &[(recipe.inputs[0].resource.clone(), aggregated.total_input)],
                recipe,
                request.discounted,
            )?;
            let (output_id, output_resource) = ctx.require_resource(&recipe.output)?;
            let leftover = aggregated.total_input - outcome.consumed.iter().map(|(_, q)| q).sum::<u64>();
            (output_id, output_resource, outcome.output_quantity, leftover)
        }
        None => (input_id, input_resource.clone(), aggregated.total_input, 0),
    };

    let key = DistributionKey::new(&request.session_ids, output_id);

    let lines = if aggregated.weights.is_empty() && total == 0 {
        debug!("Nothing collected for {} - empty plan", key);
        Vec::new()
    } else {
        allocate(total, &aggregated.weights)?
            .into_vec()
            .into_iter()
            .map(|(user, share)| ctx.line_for(user, share))
            .collect()
    };

    info!(
        key = %key,
        total_input = aggregated.total_input,
        total_distributed = total,
        recipients = lines.len(),
        "Distribution planned"
    );

    Ok(DistributionPlan {
        key,
        input_resource,
        output_resource,
        strategy_used: aggregated.strategy_used,
        recipe: request.recipe.clone(),
        discounted: request.discounted,
        total_input: aggregated.total_input,
        leftover_input,
        total_distributed: total,
        lines,
    })
}

/// Slot in a split whose name could not be matched to a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsAttention {
    pub name: String,
    pub share: u64,
}

/// Manual group submission split evenly across everyone present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSubmissionPlan {
    pub resource: ResourceRef,
    pub total: u64,
    pub lines: Vec<DistributionLine>,
    pub needs_attention: Vec<NeedsAttention>,
}

/// Split a group haul evenly among the named participants
///
/// Unresolved names still count as a head in the split; their slot is
/// returned in `needs_attention` instead of being recorded.
pub fn plan_group_submission<S: AsRef<str>>(
    resource: &str,
    total: u64,
    participants: &[S],
    ctx: &EngineContext<'_>,
) -> Result<GroupSubmissionPlan> {
    let (_, resource) = ctx.require_resource(resource)?;
    let people = resolve_participants(participants, ctx.directory);
    let slots: Vec<usize> = (0..people.len()).collect();
    let allocation = split_equally(total, &slots)?;

    let mut plan = GroupSubmissionPlan {
        resource,
        total,
        lines: Vec::new(),
        needs_attention: Vec::new(),
    };
    for (i, share) in allocation.into_vec() {
        match people[i].id {
            Some(user) => plan.lines.push(ctx.line_for(user, share)),
            None => plan.needs_attention.push(NeedsAttention {
                name: people[i].display_name.clone(),
                share: share.0,
            }),
        }
    }
    if !plan.needs_attention.is_empty() {
        warn!(
            "{} participant(s) in group submission need manual resolution",
            plan.needs_attention.len()
        );
    }
    Ok(plan)
}
