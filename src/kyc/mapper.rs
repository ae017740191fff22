// src/kyc/mapper.rs

use serde_json::Value;
use std::fmt;

use super::referral::clean_referral;
use super::types::KycRecord;

/// Column offsets of the KYC fields inside a sheet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub address: usize,
    pub referred_by: usize,
    pub status: usize,
}

impl ColumnLayout {
    /// Registration sheet, columns A..L: address in F, referral in K, status in L.
    pub const SHEET_V1: ColumnLayout = ColumnLayout {
        address: 5,
        referred_by: 10,
        status: 11,
    };
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::SHEET_V1
    }
}

/// Fields that make a row degraded when missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KycField {
    Address,
    Status,
}

impl fmt::Display for KycField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KycField::Address => f.write_str("address"),
            KycField::Status => f.write_str("status"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowShape {
    WellFormed,
    Degraded { missing: Vec<KycField> },
}

impl RowShape {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RowShape::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRow {
    pub record: KycRecord,
    pub shape: RowShape,
}

/// Text of the cell at `idx`, or `None` when the row is too short or the cell is null.
pub fn cell_text(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Map one sheet row into a record. Never fails; short rows leave fields absent.
pub fn map_row(row: &[Value], layout: &ColumnLayout) -> MappedRow {
    let address = cell_text(row, layout.address);
    let referred_by = clean_referral(cell_text(row, layout.referred_by).as_deref());
    let status = cell_text(row, layout.status);

    let mut missing = Vec::new();
    if is_blank(&address) {
        missing.push(KycField::Address);
    }
    if is_blank(&status) {
        missing.push(KycField::Status);
    }
    let shape = if missing.is_empty() {
        RowShape::WellFormed
    } else {
        RowShape::Degraded { missing }
    };

    MappedRow {
        record: KycRecord {
            referral_key: address.clone(),
            address,
            referred_by,
            status,
        },
        shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(cells: &[Value]) -> Vec<Value> {
        cells.to_vec()
    }

    fn full_row() -> Vec<Value> {
        row(&[
            json!("2018-01-04"),
            json!("Jane"),
            json!("Doe"),
            json!("jane@example.com"),
            json!("BE"),
            json!("0x00000000000000000000000000000000000000aa"),
            json!(""),
            json!(""),
            json!(""),
            json!(""),
            json!("dke02sx60x00000000000000000000000000000000000000bb"),
            json!("APPROVED"),
        ])
    }

    #[test]
    fn maps_full_row() {
        let mapped = map_row(&full_row(), &ColumnLayout::SHEET_V1);
        assert_eq!(mapped.shape, RowShape::WellFormed);
        let r = mapped.record;
        assert_eq!(
            r.address.as_deref(),
            Some("0x00000000000000000000000000000000000000aa")
        );
        assert_eq!(
            r.referred_by.as_deref(),
            Some("0x00000000000000000000000000000000000000bb")
        );
        assert_eq!(r.referral_key, r.address);
        assert_eq!(r.status.as_deref(), Some("APPROVED"));
    }

    #[test]
    fn short_rows_leave_fields_absent() {
        for len in 0..6 {
            let mapped = map_row(&full_row()[..len], &ColumnLayout::SHEET_V1);
            assert_eq!(mapped.record.address, None, "len {}", len);
            assert_eq!(mapped.record.referral_key, None);
        }
        for len in 0..11 {
            let mapped = map_row(&full_row()[..len], &ColumnLayout::SHEET_V1);
            assert_eq!(mapped.record.referred_by, None, "len {}", len);
        }
        let mapped = map_row(&full_row()[..11], &ColumnLayout::SHEET_V1);
        assert_eq!(mapped.record.status, None);
    }

    #[test]
    fn referral_key_follows_address() {
        for len in [0, 5, 6, 12] {
            let mapped = map_row(&full_row()[..len], &ColumnLayout::SHEET_V1);
            assert_eq!(mapped.record.referral_key, mapped.record.address);
        }
    }

    #[test]
    fn non_string_cells_use_display_text() {
        let mut cells = full_row();
        cells[5] = json!(42);
        cells[11] = json!(true);
        cells[10] = Value::Null;
        let r = map_row(&cells, &ColumnLayout::SHEET_V1).record;
        assert_eq!(r.address.as_deref(), Some("42"));
        assert_eq!(r.status.as_deref(), Some("true"));
        assert_eq!(r.referred_by, None);
    }

    #[test]
    fn classifies_degraded_rows() {
        let mapped = map_row(&full_row()[..6], &ColumnLayout::SHEET_V1);
        assert_eq!(
            mapped.shape,
            RowShape::Degraded {
                missing: vec![KycField::Status]
            }
        );

        let mut cells = full_row();
        cells[5] = json!("  ");
        let mapped = map_row(&cells, &ColumnLayout::SHEET_V1);
        assert_eq!(
            mapped.shape,
            RowShape::Degraded {
                missing: vec![KycField::Address]
            }
        );
        // blank stays blank; no cleanup of the address itself
        assert_eq!(mapped.record.address.as_deref(), Some("  "));
    }

    #[test]
    fn missing_referral_is_still_well_formed() {
        let mut cells = full_row();
        cells[10] = json!("");
        let mapped = map_row(&cells, &ColumnLayout::SHEET_V1);
        assert!(!mapped.shape.is_degraded());
        assert_eq!(mapped.record.referred_by, None);
    }
}
