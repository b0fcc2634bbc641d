use crate::types::CampaignRecipient;
use csv::{ReaderBuilder, StringRecord, Trim};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;

/// Recipient attributes a CSV column can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientField {
    AddressId,
    AddressLine1,
    City,
    StateProvinceRegion,
    PostalCode,
    Market,
    Sector,
    Email,
    CoreSegment,
    SubSegment,
}

/// Lower-cased header text -> field. Headers not listed here are ignored.
static HEADER_SYNONYMS: Lazy<HashMap<&'static str, RecipientField>> = Lazy::new(|| {
    use RecipientField::*;
    HashMap::from([
        ("address_id", AddressId),
        ("addressid", AddressId),
        ("address id", AddressId),
        ("address_line_1", AddressLine1),
        ("address_line1", AddressLine1),
        ("addressline1", AddressLine1),
        ("address line 1", AddressLine1),
        ("address", AddressLine1),
        ("city", City),
        ("state", StateProvinceRegion),
        ("province", StateProvinceRegion),
        ("region", StateProvinceRegion),
        ("state_province_region", StateProvinceRegion),
        ("stateprovinceregion", StateProvinceRegion),
        ("postal_code", PostalCode),
        ("postalcode", PostalCode),
        ("postal code", PostalCode),
        ("zip", PostalCode),
        ("zip_code", PostalCode),
        ("zipcode", PostalCode),
        ("market", Market),
        ("sector", Sector),
        ("email", Email),
        ("email_address", Email),
        ("emailaddress", Email),
        ("e-mail", Email),
        ("core_segment", CoreSegment),
        ("coresegment", CoreSegment),
        ("core segment", CoreSegment),
        ("sub_segment", SubSegment),
        ("subsegment", SubSegment),
        ("sub segment", SubSegment),
    ])
});

impl RecipientField {
    pub fn from_header(header: &str) -> Option<Self> {
        HEADER_SYNONYMS.get(header.trim().to_lowercase().as_str()).copied()
    }

    fn assign(self, recipient: &mut CampaignRecipient, value: &str) {
        let value = value.to_string();
        match self {
            RecipientField::AddressId => {
                recipient.address_id = if value.is_empty() { None } else { Some(value) }
            }
            RecipientField::AddressLine1 => recipient.address_line1 = value,
            RecipientField::City => recipient.city = value,
            RecipientField::StateProvinceRegion => recipient.state_province_region = value,
            RecipientField::PostalCode => recipient.postal_code = value,
            RecipientField::Market => recipient.market = value,
            RecipientField::Sector => recipient.sector = value,
            RecipientField::Email => recipient.email = value,
            RecipientField::CoreSegment => recipient.core_segment = value,
            RecipientField::SubSegment => recipient.sub_segment = value,
        }
    }
}

/// Parse recipient CSV text. The first row is the header.
///
/// Never fails: unreadable rows are skipped, short rows leave the missing
/// fields empty, and rows without an email are dropped.
pub fn parse_recipients(csv_text: &str) -> Vec<CampaignRecipient> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(csv_text.as_bytes());

    let columns: Vec<Option<RecipientField>> = match reader.headers() {
        Ok(headers) => headers.iter().map(RecipientField::from_header).collect(),
        Err(e) => {
            debug!("Unreadable recipient header row: {}", e);
            return Vec::new();
        }
    };

    if !columns.contains(&Some(RecipientField::Email)) {
        debug!("Recipient file has no email column; every row will be dropped");
    }

    let mut recipients = Vec::new();
    let mut dropped = 0usize;
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed recipient row: {}", e);
                continue;
            }
        };
        if is_blank(&record) {
            continue;
        }
        match map_record(&columns, &record) {
            Some(recipient) => recipients.push(recipient),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} recipient rows without an email", dropped);
    }
    recipients
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.is_empty())
}

fn map_record(columns: &[Option<RecipientField>], record: &StringRecord) -> Option<CampaignRecipient> {
    let mut recipient = CampaignRecipient::default();
    for (field, cell) in columns.iter().zip(record.iter()) {
        if let Some(field) = field {
            field.assign(&mut recipient, cell.trim());
        }
    }
    if recipient.email.is_empty() {
        return None;
    }
    Some(recipient)
}
