//! Bucket coalescing from storage resolution to a coarser output resolution
//!
//! The epoch store hands back one payload per storage bucket. When a query
//! asks for a coarser resolution the adjacent storage buckets that fall into
//! the same output bucket are folded together (values summed, counts
//! saturating-summed). The output resolution must be an integer multiple of
//! the storage resolution; the request handler validates that before
//! calling in here.

use crate::payload::{self, Payload};
use crate::series::merge_point;
use crate::wire::ResPoint;

/// Coalesce a storage-resolution payload vector into output-resolution
/// points.
///
/// `start` is the nanosecond timestamp of `data[0]`'s bucket, already
/// aligned to `out_res` by the caller. Position `i` of `data` covers the
/// bucket starting at `start + i * storage_res`.
pub fn downsample(data: &[Payload], start: i64, storage_res: i64, out_res: i64) -> Vec<ResPoint> {
    let mut points: Vec<ResPoint> = Vec::new();
    if data.is_empty() {
        return points;
    }

    let (value, count) = payload::decode(&data[0]);
    points.push(ResPoint { value, count });
    let mut prev_bucket = start - start.rem_euclid(out_res);

    for (i, pld) in data.iter().enumerate().skip(1) {
        let ts = start + storage_res * i as i64;
        let bucket = ts - ts.rem_euclid(out_res);
        let (value, count) = payload::decode(pld);
        let point = ResPoint { value, count };

        if bucket == prev_bucket {
            // last element exists, first point was pushed above
            let prev = points.last_mut().unwrap();
            merge_point(prev, &point);
        } else {
            points.push(point);
            prev_bucket = bucket;
        }
    }

    points
}
