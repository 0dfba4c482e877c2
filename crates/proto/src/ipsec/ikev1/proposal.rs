//! Phase 2 proposal construction, selection and verification
//!
//! - The initiator builds one proposal payload per requested SA, all with
//!   the same proposal number ([`build`]).
//! - The responder picks the first complete proposal matching its policy
//!   ([`select`]).
//! - The initiator checks that the responder returned what was offered
//!   ([`verify`]).
//!
//! Policy entries are grouped into spans: a tunnel-mode entry starts a new
//! span, so an AH+ESP bundle must be matched as a whole.

use super::constants::{attr, DOI_IPSEC, PHASE2_PROPOSAL_NUMBER, SIT_IDENTITY_ONLY};
use super::payload::{DataAttribute, ProposalPayload, SaPayload, TransformPayload};
use super::sa2::Sa2Item;
use super::security::{EncapsulationMode, Lifetime, SecurityProtocol};
use super::transform::match_transform;
use crate::ipsec::crypto::DhGroup;
use crate::ipsec::{Error, Result};
use tracing::{debug, trace};

/// Options for building proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Upper bound on proposal payloads
    pub max_proposals: usize,
    /// Leave out AUTH_ALGO when no authentication is used
    pub omit_null_auth: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            max_proposals: 4,
            omit_null_auth: true,
        }
    }
}

fn build_transform(
    security: &SecurityProtocol,
    lifetime: Lifetime,
    pfs_group: Option<DhGroup>,
    omit_null_auth: bool,
) -> Result<TransformPayload> {
    let transform_id = security
        .transform_id()
        .ok_or(Error::InvalidTransform(0))?;
    let mut transform = TransformPayload::new(1, transform_id);

    if let Some(encryption) = security.encryption {
        let key_bits = encryption.key_bits();
        if key_bits != 0 {
            transform
                .attributes
                .push(DataAttribute::basic(attr::KEY_LENGTH, key_bits));
        }
    }

    transform.attributes.push(DataAttribute::basic(
        attr::ENCAP_MODE,
        security.mode.attribute_value(),
    ));

    if let Some(group) = pfs_group {
        transform
            .attributes
            .push(DataAttribute::basic(attr::GROUP_DESC, group.to_u16()));
    }

    match security.auth.attribute_value() {
        Some(value) => transform
            .attributes
            .push(DataAttribute::basic(attr::AUTH_ALGO, value)),
        None if omit_null_auth => {}
        // ESP without authentication and the attribute is still wanted
        None => transform
            .attributes
            .push(DataAttribute::basic(attr::AUTH_ALGO, 0)),
    }

    if let Lifetime::Seconds(secs) = lifetime {
        transform.attributes.push(DataAttribute::basic(
            attr::LIFE_TYPE,
            attr::LIFE_TYPE_SECONDS,
        ));
        transform
            .attributes
            .push(DataAttribute::with_u32(attr::LIFE_DURATION, secs));
    }

    Ok(transform)
}

/// Build the initiator's SA payload from the SA2 items of the exchange
///
/// Every proposal payload carries the same proposal number, a single
/// transform and the local SPI of the corresponding item.
pub fn build(
    items: &[Sa2Item],
    pfs_group: Option<DhGroup>,
    options: &BuildOptions,
) -> Result<SaPayload> {
    if items.is_empty() {
        return Err(Error::InvalidParameter("No SA requests".into()));
    }
    if items.len() > options.max_proposals {
        return Err(Error::TooManyProposals);
    }

    let mut proposals = Vec::with_capacity(items.len());
    for item in items {
        let transform = build_transform(
            &item.security,
            item.lifetime,
            pfs_group,
            options.omit_null_auth,
        )?;
        proposals.push(ProposalPayload {
            number: PHASE2_PROPOSAL_NUMBER,
            protocol_id: item.security.protocol.protocol_id().to_u8(),
            spi: item.local_spi.to_be_bytes().to_vec(),
            transforms: vec![transform],
        });
    }

    Ok(SaPayload {
        doi: DOI_IPSEC,
        situation: SIT_IDENTITY_ONLY,
        proposals,
        partial: false,
    })
}

/// Number of policy entries in the span containing `index`
pub fn proposal_span(index: usize, policy: &[SecurityProtocol]) -> usize {
    let mut span = 0;
    let mut pos = policy.len();
    while pos > 0 {
        pos -= 1;
        span += 1;
        if policy[pos].mode == EncapsulationMode::Tunnel {
            if pos <= index {
                break;
            }
            span = 0;
        }
    }
    span
}

/// Responder's choice from an incoming SA payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected proposal payloads, each with the matching transform only;
    /// SPIs still hold the initiator's values
    pub proposals: Vec<ProposalPayload>,
    /// One item per selected payload, copied from the matching policy entry
    pub items: Vec<Sa2Item>,
}

impl Selection {
    /// Proposal number of the selection
    pub fn number(&self) -> Option<u8> {
        self.proposals.first().map(|p| p.number)
    }
}

struct GroupState {
    number: u8,
    proposals: Vec<ProposalPayload>,
    items: Vec<Sa2Item>,
    consumed: Vec<bool>,
    last_index: usize,
    failed: bool,
}

impl GroupState {
    fn new(number: u8, policy_len: usize) -> Self {
        GroupState {
            number,
            proposals: Vec::new(),
            items: Vec::new(),
            consumed: vec![false; policy_len],
            last_index: 0,
            failed: false,
        }
    }

    fn is_complete(&self, policy: &[SecurityProtocol]) -> bool {
        !self.failed
            && !self.proposals.is_empty()
            && proposal_span(self.last_index, policy) == self.proposals.len()
    }
}

/// Select a proposal from `incoming` that satisfies `policy`
///
/// Proposal payloads are grouped by proposal number in wire order. The
/// first group whose every payload matches a distinct policy entry, and
/// which covers a whole policy span, wins. Groups that fail are skipped.
pub fn select(
    incoming: &SaPayload,
    policy: &[SecurityProtocol],
    lifetime: Lifetime,
    pfs_group: Option<DhGroup>,
) -> Result<Selection> {
    if policy.is_empty() || incoming.proposals.is_empty() {
        return Err(Error::NotNegotiable);
    }

    let mut group = GroupState::new(incoming.proposals[0].number, policy.len());
    let mut selected = None;

    for proposal in &incoming.proposals {
        if proposal.number != group.number {
            let next = GroupState::new(proposal.number, policy.len());
            if group.is_complete(policy) {
                selected = Some(std::mem::replace(&mut group, next));
                break;
            }
            trace!(number = group.number, "Proposal not suitable, trying next");
            group = next;
        }

        if group.failed {
            continue;
        }

        if proposal.protocol_id == 0 {
            return Err(Error::InvalidProtocol(0));
        }

        let mut matched = None;
        'entries: for (j, security) in policy.iter().enumerate() {
            if group.consumed[j]
                || proposal.protocol_id != security.protocol.protocol_id().to_u8()
            {
                continue;
            }
            for transform in &proposal.transforms {
                if let Ok(true) =
                    match_transform(proposal.protocol_id, transform, security, lifetime, pfs_group)
                {
                    matched = Some((j, transform));
                    break 'entries;
                }
            }
        }

        match matched {
            Some((j, transform)) => {
                group.consumed[j] = true;
                group.last_index = j;
                group
                    .items
                    .push(Sa2Item::new(policy[j], 0, lifetime));
                group.proposals.push(ProposalPayload {
                    number: proposal.number,
                    protocol_id: proposal.protocol_id,
                    spi: proposal.spi.clone(),
                    transforms: vec![transform.clone()],
                });
            }
            None => group.failed = true,
        }
    }

    let selected = match selected {
        Some(group) => group,
        None if group.is_complete(policy) => {
            // The final group of a partially decoded SA may be truncated
            if incoming.partial {
                debug!("Last proposal cannot be chosen from partial SA");
                return Err(Error::NotNegotiable);
            }
            group
        }
        None => return Err(Error::NotNegotiable),
    };

    debug!(
        number = selected.number,
        payloads = selected.proposals.len(),
        "Suitable proposal selected"
    );
    Ok(Selection {
        proposals: selected.proposals,
        items: selected.items,
    })
}

/// Verify the responder's selection against the offered SA2 items
pub fn verify(
    selection: &SaPayload,
    items: &[Sa2Item],
    lifetime: Lifetime,
    pfs_group: Option<DhGroup>,
) -> Result<()> {
    let first = selection.proposals.first().ok_or(Error::ProposalTampered)?;

    for (i, proposal) in selection.proposals.iter().enumerate() {
        let item = items.get(i).ok_or(Error::Sa2NotFound)?;

        if proposal.number != first.number {
            return Err(Error::TooManyProposals);
        }
        if proposal.transforms.len() != 1 {
            return Err(Error::ProposalTampered);
        }
        if proposal.spi.len() < 3 || proposal.spi[..3] == [0, 0, 0] {
            return Err(Error::InvalidSpi(proposal.spi_u32().unwrap_or(0)));
        }
        if proposal.protocol_id != item.security.protocol.protocol_id().to_u8() {
            return Err(Error::ProposalTampered);
        }
        match match_transform(
            proposal.protocol_id,
            &proposal.transforms[0],
            &item.security,
            lifetime,
            pfs_group,
        ) {
            Ok(true) => {}
            _ => return Err(Error::ProposalTampered),
        }
    }

    Ok(())
}
