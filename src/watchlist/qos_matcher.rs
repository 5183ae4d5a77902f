use crate::message::msgs::RequestMsg;
use crate::message::qos::Qos;
use crate::watchlist::error::WatchlistError;

/// Checks that a request's QoS and worst QoS (if present) can be negotiated at all.
pub fn validate_request_qos(request: &RequestMsg) -> Result<(), WatchlistError> {
    if let Some(qos) = &request.qos {
        if !qos.is_specified() {
            return Err(WatchlistError::InvalidQos(*qos));
        }
    }
    if let Some(worst) = &request.worst_qos {
        if !worst.is_specified() {
            return Err(WatchlistError::InvalidWorstQos(*worst));
        }
    }
    Ok(())
}

/// Determines the QoS to request from a service, or `None` if the service can not satisfy the
///  request.
///
/// A service that advertises no QoS is treated as providing only realtime / tick-by-tick. Without
///  a requested QoS, the service's best QoS is chosen. With only `requested`, the service must
///  provide exactly that quality. With a `worst` QoS, the best advertised QoS that lies in the
///  range is chosen.
///
/// The returned QoS's `dynamic` flag is always taken from `requested`.
pub fn match_qos(requested: Option<&Qos>, worst: Option<&Qos>, service_qos: &[Qos]) -> Option<Qos> {
    let implicit = [Qos::REALTIME_TICK_BY_TICK];
    let service_qos = if service_qos.is_empty() {
        &implicit[..]
    }
    else {
        service_qos
    };

    let requested = match requested {
        None => return best_of(service_qos.iter()).map(|q| q.with_dynamic(false)),
        Some(q) => q,
    };

    let matched = match worst {
        None => service_qos.iter()
            .find(|q| q.same_quality(requested))
            .copied(),
        Some(worst) => best_of(service_qos.iter()
            .filter(|q| q.is_in_range(requested, worst))),
    };

    matched.map(|q| q.with_dynamic(requested.dynamic))
}

fn best_of<'a>(candidates: impl Iterator<Item = &'a Qos>) -> Option<Qos> {
    let mut best: Option<Qos> = None;
    for candidate in candidates {
        match &best {
            Some(b) if !candidate.is_better(b) => {}
            _ => best = Some(*candidate),
        }
    }
    best
}
