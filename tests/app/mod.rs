mod bench_run;
mod config_file;
