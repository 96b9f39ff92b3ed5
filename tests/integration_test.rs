mod cluster_start_stop;
mod common;
mod join_cluster;
mod snapshot;
