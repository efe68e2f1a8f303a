//! Vehicle and challan lookup by registration number.

use challan_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

use super::store::{normalize_vehicle_number, LedgerStore};
use crate::dtos::{
    ChallanLookupResponse, ChallanResponse, VehicleDetailsResponse, VehicleInfoResponse,
    VehicleResponse,
};
use crate::models::{Challan, ChallanStatus, Vehicle};
use crate::utils::{format_date, format_time, mask_name};

const DEFAULT_VEHICLE_IMAGE: &str =
    "https://images.unsplash.com/photo-1494976388531-d1058494cdd8?w=100&h=60&fit=crop";
const DEFAULT_PROOF_IMAGE: &str =
    "https://images.unsplash.com/photo-1449965408869-eaa3f722e40d?w=400&h=300&fit=crop";

#[derive(Clone)]
pub struct ChallanLookup {
    store: Arc<dyn LedgerStore>,
}

impl ChallanLookup {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn find(
        &self,
        vehicle_number: &str,
        not_found: &'static str,
    ) -> Result<Vehicle, AppError> {
        let normalized = normalize_vehicle_number(vehicle_number);
        if normalized.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Vehicle number is required"
            )));
        }

        self.store
            .find_vehicle(&normalized)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!(not_found)))
    }

    #[instrument(skip(self))]
    pub async fn lookup(&self, vehicle_number: &str) -> Result<ChallanLookupResponse, AppError> {
        let vehicle = self
            .find(vehicle_number, "No vehicle found with this number")
            .await?;

        let challans = self.store.list_challans_for_vehicle(vehicle.id).await?;
        info!(count = challans.len(), "Challans fetched");

        let challans: Vec<ChallanResponse> = challans
            .into_iter()
            .map(|c| challan_response(c, &vehicle.vehicle_number))
            .collect();
        let pending_count = challans
            .iter()
            .filter(|c| c.status != ChallanStatus::Paid.as_str())
            .count();

        Ok(ChallanLookupResponse {
            success: true,
            vehicle: vehicle_response(vehicle),
            challans,
            pending_count,
        })
    }

    /// Registration view of one vehicle with its unpaid challan count.
    #[instrument(skip(self))]
    pub async fn vehicle_info(
        &self,
        vehicle_number: &str,
    ) -> Result<VehicleDetailsResponse, AppError> {
        let vehicle = self
            .find(
                vehicle_number,
                "Vehicle not found. Please check the vehicle number and try again.",
            )
            .await?;

        let unpaid_challan_count = self
            .store
            .list_challans_for_vehicle(vehicle.id)
            .await?
            .iter()
            .filter(|c| {
                matches!(
                    c.parsed_status(),
                    Some(ChallanStatus::Pending | ChallanStatus::Overdue)
                )
            })
            .count();
        info!(unpaid = unpaid_challan_count, "Vehicle info fetched");

        let two_wheeler = vehicle.vehicle_type == "Bike";
        let (seating_capacity, vehicle_class, body_type) = if two_wheeler {
            (2, "Motor Cycle/Scooter (2WN)", "SCOOTER")
        } else {
            (5, "Motor Car (LMV)", "HATCHBACK")
        };

        Ok(VehicleDetailsResponse {
            success: true,
            vehicle: VehicleInfoResponse {
                vehicle: vehicle_response(vehicle),
                ownership_type: "First Owner".to_string(),
                unpaid_challan_count,
                seating_capacity,
                vehicle_class: vehicle_class.to_string(),
                body_type: body_type.to_string(),
                blacklist_status: false,
                rc_status: "ACTIVE".to_string(),
            },
        })
    }
}

fn vehicle_response(vehicle: Vehicle) -> VehicleResponse {
    let vehicle_type = if vehicle.vehicle_type == "Bike" {
        "Two Wheeler"
    } else {
        "Private Vehicle"
    };
    VehicleResponse {
        id: vehicle.id,
        owner: mask_name(vehicle.owner_name.as_deref()),
        vehicle_type: vehicle_type.to_string(),
        number: vehicle.vehicle_number,
        type_: vehicle.vehicle_type,
        is_verified: true,
        image: vehicle
            .image_url
            .unwrap_or_else(|| DEFAULT_VEHICLE_IMAGE.to_string()),
    }
}

fn challan_response(challan: Challan, vehicle_number: &str) -> ChallanResponse {
    ChallanResponse {
        id: challan.challan_number,
        db_id: challan.id,
        vehicle_number: vehicle_number.to_string(),
        type_: challan.violation_type,
        description: challan.description,
        amount: challan.amount,
        status: challan.status,
        date: format_date(challan.fine_date),
        time: format_time(challan.fine_time),
        location: challan.location,
        proof_image: challan
            .proof_image_url
            .unwrap_or_else(|| DEFAULT_PROOF_IMAGE.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryStore;

    #[tokio::test]
    async fn finds_vehicle_regardless_of_separators() {
        let lookup = ChallanLookup::new(Arc::new(InMemoryStore::with_demo_data()));

        let resp = lookup.lookup("mh 12 ab 1234").await.unwrap();

        assert_eq!(resp.vehicle.number, "MH-12-AB-1234");
        assert_eq!(resp.vehicle.owner, "R*** K***");
        assert_eq!(resp.vehicle.vehicle_type, "Private Vehicle");
        assert_eq!(resp.challans.len(), 3);
        assert_eq!(resp.pending_count, 3);
        assert_eq!(resp.challans[0].date, "18 Oct 2023");
        assert_eq!(resp.challans[0].time, "11:00");
    }

    #[tokio::test]
    async fn bikes_are_two_wheelers() {
        let lookup = ChallanLookup::new(Arc::new(InMemoryStore::with_demo_data()));
        let resp = lookup.lookup("DL05CX4567").await.unwrap();
        assert_eq!(resp.vehicle.vehicle_type, "Two Wheeler");
    }

    #[tokio::test]
    async fn vehicle_info_counts_unpaid_challans() {
        let lookup = ChallanLookup::new(Arc::new(InMemoryStore::with_demo_data()));

        let car = lookup.vehicle_info("MH-12-AB-1234").await.unwrap().vehicle;
        assert_eq!(car.unpaid_challan_count, 3);
        assert_eq!(car.seating_capacity, 5);
        assert_eq!(car.vehicle_class, "Motor Car (LMV)");
        assert_eq!(car.vehicle.owner, "R*** K***");

        let bike = lookup.vehicle_info("dl05cx4567").await.unwrap().vehicle;
        assert_eq!(bike.body_type, "SCOOTER");
        assert_eq!(bike.vehicle.vehicle_type, "Two Wheeler");
    }

    #[tokio::test]
    async fn unknown_vehicle_is_not_found() {
        let lookup = ChallanLookup::new(Arc::new(InMemoryStore::with_demo_data()));
        assert!(matches!(
            lookup.lookup("XX00XX0000").await,
            Err(AppError::NotFound(_))
        ));
    }
}
