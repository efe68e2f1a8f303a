pub mod challan;
pub mod payment;

pub use challan::{
    ChallanLookupResponse, ChallanResponse, VehicleDetailsResponse, VehicleInfoResponse,
    VehicleResponse,
};
pub use payment::{
    CreateOrderRequest, CreateOrderResponse, OrderResponse, ReceiptListResponse, ReceiptResponse,
    UserReceiptsQuery, VerifyPaymentRequest, VerifyPaymentResponse,
};
