use crate::types::CampaignRecipient;
use std::collections::HashSet;

/// Case-insensitive email identity, `None` for blank emails.
pub fn email_key(recipient: &CampaignRecipient) -> Option<String> {
    let email = recipient.email.trim();
    if email.is_empty() {
        None
    } else {
        Some(email.to_lowercase())
    }
}

/// Address identity: the external address id when present, otherwise the
/// lower-cased line/city/state/postal composite. `None` when the row carries
/// no address at all, so email-only rows never collide with each other.
pub fn address_key(recipient: &CampaignRecipient) -> Option<String> {
    if let Some(id) = recipient.address_id.as_deref().map(str::trim) {
        if !id.is_empty() {
            return Some(format!("id:{}", id.to_lowercase()));
        }
    }

    let parts = [
        recipient.address_line1.trim(),
        recipient.city.trim(),
        recipient.state_province_region.trim(),
        recipient.postal_code.trim(),
    ];
    if parts.iter().all(|p| p.is_empty()) {
        return None;
    }
    Some(format!("addr:{}", parts.join("|").to_lowercase()))
}

/// Drop every recipient whose email or address key was already seen.
/// First occurrence wins; the two keys are checked independently.
pub fn dedupe_recipients(recipients: Vec<CampaignRecipient>) -> Vec<CampaignRecipient> {
    let mut seen_emails = HashSet::new();
    let mut seen_addresses = HashSet::new();
    let mut kept = Vec::with_capacity(recipients.len());

    for recipient in recipients {
        let email = email_key(&recipient);
        let address = address_key(&recipient);

        let email_dup = email.as_ref().is_some_and(|k| seen_emails.contains(k));
        let address_dup = address.as_ref().is_some_and(|k| seen_addresses.contains(k));
        if email_dup || address_dup {
            continue;
        }

        if let Some(k) = email {
            seen_emails.insert(k);
        }
        if let Some(k) = address {
            seen_addresses.insert(k);
        }
        kept.push(recipient);
    }

    kept
}
