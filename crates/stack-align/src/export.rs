//! Tabular and JSON outputs.
//!
//! - `data/data.xlsx`: sheet `coordinates` (one row per cell x step) and
//!   sheet `alignment` (one row per cell, `dx/dy/dz` per named pair).
//! - `json/alignment.json`: pair name -> cell -> `dz` in mm, `null` when
//!   undefined.
//! - `data/measurements.json`, `data/diagnostics.json`: machine-readable run
//!   state, reloadable for a later recovery pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::{CellId, MeasurementStore, SlotId};
use crate::metrology::{AlignmentOffset, CalibrationFactor, PairAlignment};

/// Cell text for an alignment that could not be computed.
pub const UNDEFINED: &str = "undefined";

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Xlsx(#[from] XlsxError),
}

fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExportError> {
    ensure_parent(path)?;
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ExportError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// `pair -> cell -> dz_mm` (or `None`).
pub fn alignment_summary(
    pairs: &[PairAlignment],
) -> BTreeMap<String, BTreeMap<u32, Option<f64>>> {
    pairs
        .iter()
        .map(|p| {
            let cells = p
                .records
                .iter()
                .map(|r| (r.cell.0, r.offset.map(|o| o.dz_mm)))
                .collect();
            (p.pair.name.clone(), cells)
        })
        .collect()
}

pub fn write_alignment_json(path: &Path, pairs: &[PairAlignment]) -> Result<(), ExportError> {
    write_json(path, &alignment_summary(pairs))
}

fn write_offset(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    offset: Option<AlignmentOffset>,
) -> Result<(), XlsxError> {
    match offset {
        Some(o) => {
            sheet.write_number(row, col, o.dx_mm)?;
            sheet.write_number(row, col + 1, o.dy_mm)?;
            sheet.write_number(row, col + 2, o.dz_mm)?;
        }
        None => {
            for k in 0..3 {
                sheet.write_string(row, col + k, UNDEFINED)?;
            }
        }
    }
    Ok(())
}

fn write_header(sheet: &mut Worksheet, headers: &[String], bold: &Format) -> Result<(), XlsxError> {
    for (col, h) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, h.as_str(), bold)?;
    }
    Ok(())
}

/// Write the `coordinates` and `alignment` sheets.
///
/// Millimetre columns are left empty when the run is not calibrated.
pub fn write_workbook(
    path: &Path,
    store: &MeasurementStore,
    factor: Option<CalibrationFactor>,
    pairs: &[PairAlignment],
) -> Result<(), ExportError> {
    ensure_parent(path)?;
    let bold = Format::new().set_bold();
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("coordinates")?;
    let headers: Vec<String> = [
        "cell", "batch", "press", "step", "part", "x", "y", "r_px", "r_mm", "valid",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    write_header(sheet, &headers, &bold)?;
    for (i, m) in store.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, m.cell.0)?;
        sheet.write_number(row, 1, m.batch.0)?;
        sheet.write_number(row, 2, m.slot.get())?;
        sheet.write_number(row, 3, m.step.index())?;
        sheet.write_string(row, 4, m.step.part_name())?;
        sheet.write_number(row, 5, m.center.x)?;
        sheet.write_number(row, 6, m.center.y)?;
        sheet.write_number(row, 7, m.radius)?;
        if let Some(f) = factor {
            let r_mm = (f.px_to_mm(m.radius as f64) * 1000.0).round() / 1000.0;
            sheet.write_number(row, 8, r_mm)?;
        }
        sheet.write_boolean(row, 9, m.valid)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("alignment")?;
    let mut headers = vec!["cell".to_string(), "press".to_string()];
    for p in pairs {
        for axis in ["dx_mm", "dy_mm", "dz_mm"] {
            headers.push(format!("{} {axis}", p.pair.name));
        }
    }
    write_header(sheet, &headers, &bold)?;

    let press: BTreeMap<CellId, SlotId> = store.iter().map(|m| (m.cell, m.slot)).collect();
    for (i, (cell, slot)) in press.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, cell.0)?;
        sheet.write_number(row, 1, slot.get())?;
        for (k, p) in pairs.iter().enumerate() {
            let offset = p
                .records
                .iter()
                .find(|r| r.cell == *cell)
                .and_then(|r| r.offset);
            write_offset(sheet, row, 2 + 3 * k as u16, offset)?;
        }
    }

    workbook.save(path)?;
    log::info!("wrote {}", path.display());
    Ok(())
}
