// Inbound host-push dispatch
//
// Hosts push framed messages over the same transport that serves RPCs.
// The first segment names the command; `expire` carries the cache keys
// that just expired, anything else is ignored.

use crate::events::CacheEvent;
use crate::transport::framing::{decode_segments, EXPIRE_COMMAND};
use crate::transport::HostEndpoint;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub(crate) fn dispatch(
    endpoint: &HostEndpoint,
    payload: &[u8],
    subscribers: &broadcast::Sender<CacheEvent>,
) {
    let segments = match decode_segments(payload) {
        Ok(segments) => segments,
        Err(error) => {
            warn!(%endpoint, %error, "discarding malformed host message");
            return;
        }
    };
    let Some((command, keys)) = segments.split_first() else {
        return;
    };

    if command.eq_ignore_ascii_case(EXPIRE_COMMAND) {
        for cache_key in keys {
            let _ = subscribers.send(CacheEvent::CacheItemExpired {
                cache_key: cache_key.clone(),
            });
        }
    } else {
        debug!(%endpoint, command = %command, "ignoring unknown host command");
    }
}
