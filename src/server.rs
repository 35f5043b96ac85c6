//! Per-operation request handlers and the batch dispatcher
//!
//! Handlers share one shape: validate the decoded request, talk to the
//! registry and the epoch store, build the response. Wire timestamps are
//! seconds and get multiplied into nanoseconds here; everything below this
//! layer speaks nanoseconds. Errors propagate unchanged to the router,
//! which maps them onto the transport.

use crate::downsample::downsample;
use crate::error::{Error, Result};
use crate::payload;
use crate::registry::{Registry, NS_PER_SEC};
use crate::series::SeriesSet;
use crate::wire::{
    DbInfo, EditReq, EditRes, GetReq, GetRes, IncReq, IncRes, InfoReq, InfoRes, OpenReq, OpenRes,
    PutReq, PutRes, ReqBatch, Request, ResBatch, ResSeries, Response,
};
use tracing::instrument;

/// Request-handling engine above the database registry
pub struct Server {
    registry: Registry,
}

impl Server {
    /// Wrap a scanned registry
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// The registry this server answers from
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// List every registered database with its resolution in seconds.
    /// Callers must treat the result as a set.
    pub async fn info(&self, _req: &InfoReq) -> Result<InfoRes> {
        let databases = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(name, store)| {
                let meta = store.info();
                DbInfo {
                    database: name,
                    resolution: (meta.resolution / NS_PER_SEC) as u32,
                }
            })
            .collect();
        Ok(InfoRes { databases })
    }

    /// Create a database, or do nothing when the name is already registered
    #[instrument(level = "debug", skip_all, fields(database = %req.database))]
    pub async fn open(&self, req: &OpenReq) -> Result<OpenRes> {
        self.registry.open(req).await?;
        Ok(OpenRes {})
    }

    /// Update the epoch caps of a registered database
    #[instrument(level = "debug", skip_all, fields(database = %req.database))]
    pub async fn edit(&self, req: &EditReq) -> Result<EditRes> {
        self.registry
            .edit(&req.database, req.max_ro_epochs, req.max_rw_epochs)
            .await?;
        Ok(EditRes {})
    }

    /// Write one sample, replacing the addressed bucket
    #[instrument(level = "debug", skip_all, fields(database = %req.database))]
    pub async fn put(&self, req: &PutReq) -> Result<PutRes> {
        let store = self.registry.find(&req.database)?;
        let timestamp = req.timestamp as i64 * NS_PER_SEC;
        store
            .put(timestamp, &req.fields, payload::encode(req.value, req.count))
            .await?;
        Ok(PutRes {})
    }

    /// Add to the addressed bucket.
    ///
    /// This is a read-modify-write at bucket granularity and is not
    /// atomic: two concurrent increments of the same bucket may lose one
    /// update. Callers needing stronger semantics must serialize, or use
    /// `put` with pre-aggregated counts.
    #[instrument(level = "debug", skip_all, fields(database = %req.database))]
    pub async fn inc(&self, req: &IncReq) -> Result<IncRes> {
        let store = self.registry.find(&req.database)?;
        let meta = store.info();

        let timestamp = req.timestamp as i64 * NS_PER_SEC;
        let end = timestamp + meta.resolution;
        let data = store.one(timestamp, end, &req.fields).await?;
        let (value, count) = data.first().map(payload::decode).unwrap_or((0.0, 0));

        let updated = payload::encode(value + req.value, count.saturating_add(req.count));
        store.put(timestamp, &req.fields, updated).await?;
        Ok(IncRes {})
    }

    /// Range query: fetch, down-sample per tuple, group, merge
    #[instrument(level = "debug", skip_all, fields(database = %req.database))]
    pub async fn get(&self, req: &GetReq) -> Result<GetRes> {
        let store = self.registry.find(&req.database)?;
        let meta = store.info();

        let out_res = if req.resolution == 0 {
            meta.resolution
        } else {
            req.resolution as i64 * NS_PER_SEC
        };
        if out_res % meta.resolution != 0 {
            return Err(Error::Resolution);
        }

        // snap the window to output bucket boundaries
        let mut start = req.start_time as i64 * NS_PER_SEC;
        start -= start.rem_euclid(out_res);
        let mut end = req.end_time as i64 * NS_PER_SEC;
        end -= end.rem_euclid(out_res);

        let data = store.get(start, end, &req.fields).await?;

        let mut set = SeriesSet::new(req.group_by.clone());
        for (fields, payloads) in data {
            let points = downsample(&payloads, start, meta.resolution, out_res);
            set.insert(ResSeries { fields, points });
        }

        Ok(GetRes {
            groups: set.into_groups(),
        })
    }

    /// Run a batch of tagged requests in order.
    ///
    /// The response vector is positionally aligned with the request
    /// vector. The first sub-handler error aborts the batch; earlier side
    /// effects stay applied, there is no transaction.
    pub async fn batch(&self, req: &ReqBatch) -> Result<ResBatch> {
        let mut batch = Vec::with_capacity(req.batch.len());
        for (index, request) in req.batch.iter().enumerate() {
            match self.dispatch_one(request).await {
                Ok(response) => batch.push(response),
                Err(source) => {
                    return Err(Error::BatchAborted {
                        index,
                        source: Box::new(source),
                    })
                }
            }
        }
        Ok(ResBatch { batch })
    }

    /// Route one batch member to its handler. A member with no populated
    /// sub-request produces an empty response.
    async fn dispatch_one(&self, request: &Request) -> Result<Response> {
        let mut response = Response::default();
        if let Some(r) = &request.info_req {
            response.info_res = Some(self.info(r).await?);
        } else if let Some(r) = &request.open_req {
            response.open_res = Some(self.open(r).await?);
        } else if let Some(r) = &request.edit_req {
            response.edit_res = Some(self.edit(r).await?);
        } else if let Some(r) = &request.put_req {
            response.put_res = Some(self.put(r).await?);
        } else if let Some(r) = &request.inc_req {
            response.inc_res = Some(self.inc(r).await?);
        } else if let Some(r) = &request.get_req {
            response.get_res = Some(self.get(r).await?);
        }
        Ok(response)
    }
}
