mod error_handler;
mod governance;

pub use error_handler::log_errors;
pub use governance::{
    API_KEY_HEADER, CLIENT_CLOSED_REQUEST, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER, RequestId,
    client_key, govern, route_key,
};
