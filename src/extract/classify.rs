/// Behaviour class of a vendor error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Part of connection bring-up; `ready` is set on the final handshake code.
    HandshakeProgress { ready: bool },
    FatalConnection,
    InsecureConnection,
    Retryable,
    CancelAndRetry,
}

/// Raised locally when a request outlives its deadline.
pub const TIMEOUT_CODE: i32 = -1;
/// Historical data service returned no data.
pub const NO_DATA_CODE: i32 = 162;
/// Pacing limit on simultaneous historical requests exceeded.
pub const RATE_LIMIT_CODE: i32 = 322;
/// Request sent while the session is not connected.
pub const NOT_CONNECTED_CODE: i32 = 504;
/// Could not connect to the session host.
pub const CONNECT_FAIL_CODE: i32 = 502;
/// Connectivity between client and session host lost.
pub const CONNECTIVITY_LOST_CODE: i32 = 1100;
/// Last code of the handshake sequence.
pub const HANDSHAKE_COMPLETE_CODE: i32 = 2158;

const HANDSHAKE_OK_CODES: &[i32] = &[2104, 2106, HANDSHAKE_COMPLETE_CODE];
const INSECURE_CODES: &[i32] = &[2103, 2105, 2157];
const CANCEL_CODES: &[i32] = &[TIMEOUT_CODE, NO_DATA_CODE, RATE_LIMIT_CODE, NOT_CONNECTED_CODE];
const KNOWN_ENTITY_CODES: &[i32] = &[200, 354, 366, 386];

/// Map a code to its behaviour class. `lifecycle` is true for messages carrying the
/// sentinel id rather than a real entity id.
///
/// Total: unrecognised entity codes are retryable. Unrecognised lifecycle codes are
/// informational rather than retryable, since no entity request exists to retry.
pub fn classify(code: i32, lifecycle: bool) -> ErrorClass {
    if lifecycle {
        classify_lifecycle(code)
    } else {
        classify_entity(code)
    }
}

fn classify_lifecycle(code: i32) -> ErrorClass {
    match code {
        CONNECT_FAIL_CODE | CONNECTIVITY_LOST_CODE => ErrorClass::FatalConnection,
        c if INSECURE_CODES.contains(&c) => ErrorClass::InsecureConnection,
        HANDSHAKE_COMPLETE_CODE => ErrorClass::HandshakeProgress { ready: true },
        // farm status notices and the like
        _ => ErrorClass::HandshakeProgress { ready: false },
    }
}

fn classify_entity(code: i32) -> ErrorClass {
    if CANCEL_CODES.contains(&code) {
        ErrorClass::CancelAndRetry
    } else {
        ErrorClass::Retryable
    }
}

/// True for codes this table has an explicit entry for.
pub fn is_known(code: i32, lifecycle: bool) -> bool {
    if lifecycle {
        code == CONNECT_FAIL_CODE
            || code == CONNECTIVITY_LOST_CODE
            || INSECURE_CODES.contains(&code)
            || HANDSHAKE_OK_CODES.contains(&code)
    } else {
        CANCEL_CODES.contains(&code) || KNOWN_ENTITY_CODES.contains(&code)
    }
}
