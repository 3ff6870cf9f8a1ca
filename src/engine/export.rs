// ==========================================
// 工地物资申领履约系统 - CSV 导出
// ==========================================
// 职责: 申领明细导出 / 损耗导出，以及申领导出的回读
// 列定义（保持不变）:
// - 申领: Material, Quantity, User, Status, RequestedAt, RespondedAt,
//         ResponseMessage, Project, TotalCost
// - 损耗: Material, Requested, Consumed, Wasted, CostOfWastage
// ==========================================

use crate::domain::request::MaterialRequest;
use crate::engine::analytics::WastageRow;
use crate::repository::codec::fmt_ts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

pub const REQUEST_EXPORT_HEADERS: [&str; 9] = [
    "Material",
    "Quantity",
    "User",
    "Status",
    "RequestedAt",
    "RespondedAt",
    "ResponseMessage",
    "Project",
    "TotalCost",
];

pub const WASTAGE_EXPORT_HEADERS: [&str; 5] =
    ["Material", "Requested", "Consumed", "Wasted", "CostOfWastage"];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV 读写失败: {0}")]
    Csv(String),

    #[error("文件读写失败: {0}")]
    Io(String),

    #[error("CSV 表头不匹配: 期望 {expected:?}, 实际 {actual:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}

pub type ExportResult<T> = Result<T, ExportError>;

// ==========================================
// 行结构
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestExportRow {
    #[serde(rename = "Material")]
    pub material: String,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "RequestedAt")]
    pub requested_at: String,
    #[serde(rename = "RespondedAt")]
    pub responded_at: String,
    #[serde(rename = "ResponseMessage")]
    pub response_message: String,
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "TotalCost")]
    pub total_cost: f64,
}

impl RequestExportRow {
    /// project_names: project_id -> 项目名称；缺失时导出 project_id
    pub fn from_request(request: &MaterialRequest, project_names: &HashMap<String, String>) -> Self {
        Self {
            material: request.material_name.clone(),
            quantity: request.quantity_requested,
            user: request.username.clone(),
            status: request.status.as_str().to_string(),
            requested_at: fmt_ts(&request.requested_at),
            responded_at: request.responded_at.as_ref().map(fmt_ts).unwrap_or_default(),
            response_message: request.response_message.clone().unwrap_or_default(),
            project: project_names
                .get(&request.project_id)
                .cloned()
                .unwrap_or_else(|| request.project_id.clone()),
            total_cost: request.total_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WastageExportRow {
    #[serde(rename = "Material")]
    pub material: String,
    #[serde(rename = "Requested")]
    pub requested: i64,
    #[serde(rename = "Consumed")]
    pub consumed: i64,
    #[serde(rename = "Wasted")]
    pub wasted: i64,
    #[serde(rename = "CostOfWastage")]
    pub cost_of_wastage: f64,
}

impl From<&WastageRow> for WastageExportRow {
    fn from(row: &WastageRow) -> Self {
        Self {
            material: row.material_name.clone(),
            requested: row.requested,
            consumed: row.consumed,
            wasted: row.wasted,
            cost_of_wastage: row.cost_of_wastage,
        }
    }
}

// ==========================================
// 写出
// ==========================================

fn write_rows<W: Write, T: Serialize>(writer: W, headers: &[&str], rows: &[T]) -> ExportResult<usize> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    // 表头单独写出：空数据时也保留列定义
    csv_writer.write_record(headers)?;
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(rows.len())
}

/// 写出申领明细，返回数据行数
pub fn write_requests<W: Write>(
    writer: W,
    requests: &[MaterialRequest],
    project_names: &HashMap<String, String>,
) -> ExportResult<usize> {
    let rows: Vec<RequestExportRow> = requests
        .iter()
        .map(|r| RequestExportRow::from_request(r, project_names))
        .collect();
    write_rows(writer, &REQUEST_EXPORT_HEADERS, &rows)
}

pub fn requests_to_csv(
    requests: &[MaterialRequest],
    project_names: &HashMap<String, String>,
) -> ExportResult<String> {
    let mut buffer = Vec::new();
    write_requests(&mut buffer, requests, project_names)?;
    String::from_utf8(buffer).map_err(|e| ExportError::Io(e.to_string()))
}

/// 写出损耗明细，返回数据行数
pub fn write_wastage<W: Write>(writer: W, rows: &[WastageRow]) -> ExportResult<usize> {
    let rows: Vec<WastageExportRow> = rows.iter().map(WastageExportRow::from).collect();
    write_rows(writer, &WASTAGE_EXPORT_HEADERS, &rows)
}

pub fn wastage_to_csv(rows: &[WastageRow]) -> ExportResult<String> {
    let mut buffer = Vec::new();
    write_wastage(&mut buffer, rows)?;
    String::from_utf8(buffer).map_err(|e| ExportError::Io(e.to_string()))
}

/// 写出到文件
pub fn export_requests_to_path(
    path: &Path,
    requests: &[MaterialRequest],
    project_names: &HashMap<String, String>,
) -> ExportResult<usize> {
    let file = std::fs::File::create(path)?;
    let count = write_requests(file, requests, project_names)?;
    tracing::info!(path = %path.display(), rows = count, "申领明细已导出");
    Ok(count)
}

pub fn export_wastage_to_path(path: &Path, rows: &[WastageRow]) -> ExportResult<usize> {
    let file = std::fs::File::create(path)?;
    let count = write_wastage(file, rows)?;
    tracing::info!(path = %path.display(), rows = count, "损耗明细已导出");
    Ok(count)
}

// ==========================================
// 回读
// ==========================================

/// 读取申领导出（校验表头）
pub fn read_requests<R: Read>(reader: R) -> ExportResult<Vec<RequestExportRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let actual: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let expected: Vec<String> = REQUEST_EXPORT_HEADERS.iter().map(|h| h.to_string()).collect();
    if actual != expected {
        return Err(ExportError::HeaderMismatch { expected, actual });
    }

    let mut rows = Vec::new();
    for result in csv_reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}
