use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::money::serialize_decimal;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleResponse {
    pub id: Uuid,
    pub number: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub owner: String,
    pub vehicle_type: String,
    pub is_verified: bool,
    pub image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallanResponse {
    /// Public challan number.
    pub id: String,
    pub db_id: Uuid,
    pub vehicle_number: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub description: Option<String>,
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: Decimal,
    pub status: String,
    pub date: String,
    pub time: String,
    pub location: Option<String>,
    pub proof_image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallanLookupResponse {
    pub success: bool,
    pub vehicle: VehicleResponse,
    pub challans: Vec<ChallanResponse>,
    pub pending_count: usize,
}

/// Registration details for the vehicle page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfoResponse {
    #[serde(flatten)]
    pub vehicle: VehicleResponse,
    pub ownership_type: String,
    /// PENDING and OVERDUE challans.
    pub unpaid_challan_count: usize,
    pub seating_capacity: u8,
    pub vehicle_class: String,
    pub body_type: String,
    pub blacklist_status: bool,
    pub rc_status: String,
}

#[derive(Debug, Serialize)]
pub struct VehicleDetailsResponse {
    pub success: bool,
    pub vehicle: VehicleInfoResponse,
}
