//! Order pipeline services
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cart_limits;
pub mod checkout;
pub mod delivery_assignment;
pub mod delivery_fee;
pub mod free_delivery;
pub mod notifications;
pub mod order_transaction;
pub mod payment_breakdown;

pub use cart_limits::{CartLimitViolation, CartLimits};
pub use checkout::{CheckoutPolicy, CheckoutQuote, CheckoutService, PlacedOrder};
pub use delivery_assignment::{AgentSelector, DeliveryAssignmentService, DesignatedAgentSelector};
pub use delivery_fee::{DeliveryFeeCalculator, DeliveryQuote, FeeSchedule, FeeTier};
pub use free_delivery::{FreeDeliveryEngine, FreeDeliveryStatus};
pub use notifications::{LogMessenger, Messenger, NatsMessenger, NotificationDispatcher};
pub use order_transaction::{OrderTransactionService, PlaceOrder, RequestedLine, ShippingDetails};
pub use payment_breakdown::{PaymentBreakdown, PaymentBreakdownCalculator};

/// The authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity { pub user_id: Uuid }
