use axum::{
    extract::{Path, State},
    Json,
};
use challan_core::error::AppError;

use crate::dtos::{ChallanLookupResponse, VehicleDetailsResponse};
use crate::startup::AppState;

pub async fn get_challans(
    State(state): State<AppState>,
    Path(vehicle_number): Path<String>,
) -> Result<Json<ChallanLookupResponse>, AppError> {
    let response = state.challans.lookup(&vehicle_number).await?;
    Ok(Json(response))
}

pub async fn get_vehicle(
    State(state): State<AppState>,
    Path(vehicle_number): Path<String>,
) -> Result<Json<VehicleDetailsResponse>, AppError> {
    let response = state.challans.vehicle_info(&vehicle_number).await?;
    Ok(Json(response))
}
