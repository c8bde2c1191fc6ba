mod aggregation;
mod bulk;
mod concurrency;
mod crud;
mod graph_lookup;
mod persistence;
mod telemetry;
mod updates;
