//! Controller core: switch records, the registry indexing them, request/reply
//! correlation and the Dispatcher that ties them to the inbound queue.

pub mod dispatcher;
pub mod registry;
pub mod switch;
pub mod transactions;

pub use dispatcher::Dispatcher;
pub use registry::SwitchRegistry;
pub use switch::{HandshakeStatus, Switch, SwitchConn};
pub use transactions::{Outcome, Transactions, Waiter};
