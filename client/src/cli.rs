use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{
    JobDoneReply, JobSummary, LocationsReply, NodeUnreachableReply, NodeUnreachableRequest,
    PhaseCounts, ResourceKind, RpcError,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::env;

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://127.0.0.1:8080
fn master_base_url() -> String {
    env::var("MASTER_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI de operador para el coordinador MapReduce")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resumen del job: recursos por estado y tiempos
    Status,

    /// ¿Terminaron todas las particiones reduce?
    Done,

    /// Declara caído a un nodo; sus recursos vuelven a la cola
    Unreachable {
        #[arg(value_name = "NODE")]
        node: String,

        /// Quién hace el reporte
        #[arg(long, default_value = "operador")]
        author: String,
    },

    /// Ubicaciones actuales de los datos de un recurso
    Locations {
        #[arg(value_name = "TIPO", value_parser = parse_kind)]
        kind: ResourceKind,

        #[arg(value_name = "ID")]
        id: u32,
    },
}

fn parse_kind(s: &str) -> Result<ResourceKind, String> {
    ResourceKind::parse(s).ok_or_else(|| format!("tipo desconocido {:?} (map|reduce)", s))
}

async fn read<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    match resp.json::<RpcError>().await {
        Ok(err) => bail!("el coordinador respondió {} ({:?}): {}", status, err.kind, err.message),
        Err(_) => bail!("el coordinador respondió {}", status),
    }
}

fn print_phase(name: &str, c: &PhaseCounts) {
    let pct = if c.total > 0 {
        (c.done as f64 / c.total as f64) * 100.0
    } else {
        100.0
    };
    println!(
        "  {:<8}: total={}, pendientes={}, en_curso={}, terminados={} ({:.1}%)",
        name, c.total, c.pending, c.in_progress, c.done, pct
    );
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Status => {
            let url = format!("{}/api/v1/job", base_url);
            let job: JobSummary = read(client.get(&url).send().await?).await?;

            println!("Job:");
            println!("  terminado: {}", job.done);
            println!("  particiones reduce: {}", job.reduce_count);
            print_phase("maps", &job.maps);
            print_phase("reduces", &job.reduces);
            println!("  resets por nodos caídos: {}", job.dirty_resets);
            println!("  iniciado: {}", job.started_at);
            if let Some(ref first) = job.first_dispatch_at {
                println!("  primer despacho: {}", first);
            }
            if let Some(ref done) = job.finished_at {
                println!("  finalizado: {}", done);
            }
        }

        Commands::Done => {
            let url = format!("{}/api/v1/job/done", base_url);
            let reply: JobDoneReply = read(client.get(&url).send().await?).await?;
            println!("{}", if reply.done { "terminado" } else { "en curso" });
        }

        Commands::Unreachable { node, author } => {
            let url = format!("{}/api/v1/nodes/unreachable", base_url);
            let req = NodeUnreachableRequest {
                author,
                node: node.clone(),
            };
            let reply: NodeUnreachableReply =
                read(client.post(&url).json(&req).send().await?).await?;

            if reply.reset.is_empty() {
                println!("El nodo {} no tenía recursos asignados.", node);
            } else {
                println!("Recursos de {} devueltos a la cola:", node);
                for id in reply.reset {
                    println!("  - {}", id);
                }
            }
        }

        Commands::Locations { kind, id } => {
            let url = format!(
                "{}/api/v1/resources/{}/{}/locations",
                base_url,
                kind.as_str(),
                id
            );
            let reply: LocationsReply = read(client.get(&url).send().await?).await?;

            println!("Ubicaciones de {}:", reply.resource);
            if reply.locations.is_empty() {
                println!("  (sin datos todavía)");
            } else {
                for loc in reply.locations {
                    println!("  - {}", loc);
                }
            }
        }
    }

    Ok(())
}
