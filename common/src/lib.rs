pub mod apps;
pub mod kv;
pub mod resource;
pub mod rpc;
pub mod storage;

pub use apps::{app_by_name, Indexer, MapReduceApp, WordCount};
pub use kv::{partition_for, CodecError, JsonLinesCodec, KeyValue, KvCodec};
pub use resource::{
    Location, NodeId, PartitionResult, ResourceId, ResourceKind, ResourceStatus,
};
pub use rpc::{
    JobDoneReply, JobSummary, LocationsReply, NodeUnreachableReply, NodeUnreachableRequest,
    PhaseCounts, RpcError, RpcErrorKind, TaskDoneReply, TaskDoneRequest, TaskReply, TaskRequest,
};
pub use storage::{
    commit_reduce_output, intermediate_name, output_name, LocalResourceProvider,
    LocalResultStorage, ResourceProvider, ResultStorage, StorageError,
};
