pub mod challan_lookup;
pub mod ledger;
pub mod metrics;
pub mod razorpay;
pub mod store;

pub use challan_lookup::ChallanLookup;
pub use ledger::{LedgerService, VerifyOutcome};
pub use metrics::{get_metrics, init_metrics};
pub use razorpay::RazorpayClient;
pub use store::{Database, InMemoryStore, LedgerStore, StoreError};
