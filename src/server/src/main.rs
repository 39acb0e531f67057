// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

mod config;

use std::{fs, sync::Arc};

use anyhow::Context;
use clap::Parser;
use config::Config;
use physical_engine::{
    memory::MemoryTaskDispatcher,
    metadata::{MemoryMetaManager, MetaManager, StorageUnitMeta},
    monitor::RequestsMonitor,
    operator::{Operator, ShowTimeSeries},
    replica::SessionAffinityDispatcher,
    storage::{Builder, InMemoryStorageFactory, StorageDriverFactoryRef, StorageManager},
    task::GlobalPhysicalTask,
};
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: String,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_body = fs::read_to_string(&args.config)
        .with_context(|| format!("read config file failed, path:{}", args.config))?;
    let config: Config = toml::from_str(&config_body).context("parse config failed")?;

    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();
    info!(config = ?config, "Config loaded");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("physical-engine")
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let handle = rt.handle().clone();
    rt.block_on(run(config, handle))
}

async fn run(config: Config, runtime: Handle) -> anyhow::Result<()> {
    let topology = &config.topology;
    let meta = Arc::new(MemoryMetaManager::new(topology.node_id));
    for engine in &topology.storage_engines {
        meta.add_storage_engine(engine.clone())?;
    }

    let factory: StorageDriverFactoryRef = Arc::new(InMemoryStorageFactory);
    let storage_manager = Arc::new(StorageManager::new(
        runtime.clone(),
        &config.executor,
        [factory],
        &meta.storage_engine_list(),
    ));
    let memory_dispatcher = MemoryTaskDispatcher::new(&config.executor, runtime.clone());
    memory_dispatcher.start();

    let requests = Arc::new(RequestsMonitor::default());
    let mut builder = Builder::new(
        runtime,
        config.executor.clone(),
        meta.clone(),
        storage_manager,
        memory_dispatcher.clone(),
    )
    .monitor(requests.clone());
    if config.read_from_replicas {
        builder = builder.replica_dispatcher(Arc::new(SessionAffinityDispatcher));
    }
    let executor = builder.build();

    for unit in &topology.storage_units {
        meta.add_storage_unit(StorageUnitMeta::from(unit))?;
    }
    info!(units = ?executor.unit_ids(), "Physical engine started");

    let task = GlobalPhysicalTask::new(Operator::ShowTimeSeries(ShowTimeSeries::default()));
    match executor.execute_global_task(&task).await {
        Ok(output) => {
            let series = output.rows().map(|r| r.num_rows()).unwrap_or_default();
            info!(series, "Series of the cluster listed");
        }
        Err(e) => error!("List series of the cluster failed, err:{e}"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    info!("Shutdown signal received");

    executor.shutdown();
    memory_dispatcher.stop();
    info!(requests = ?requests.take(), "Physical engine stopped");
    Ok(())
}
