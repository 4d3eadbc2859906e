//! Legal transitions for the ingest state machine (§4.4).

use crate::models::IngestState;

pub fn legal_transition(from: IngestState, to: IngestState) -> bool {
    use IngestState::*;
    matches!(
        (from, to),
        (Queued, Rendering)
            | (Rendering, Parsing)
            | (Rendering, Error)
            | (Parsing, Done)
            | (Parsing, Error)
            | (Parsing, Interrupted)
            | (Interrupted, Parsing)
            | (Done, Parsing)
    )
}
