use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use common::{output_name, partition_for, ResourceId, RpcErrorKind, WordCount};
use master::{AppState, MasterConfig};
use tokio::{net::TcpListener, task::JoinHandle};
use worker::{
    ClientError, Coordinator, CoordinatorClient, LoopOutcome, LoopSettings, SchedulingLoop,
    TaskContext,
};

fn temp_dir(sub: &str) -> PathBuf {
    let base = env::temp_dir().join("worker_e2e_tests").join(sub);
    let _ = fs::remove_dir_all(&base);
    fs::create_dir_all(&base).unwrap();
    base
}

struct Cluster {
    base_url: String,
    state: AppState,
    output_dir: PathBuf,
    server: JoinHandle<anyhow::Result<common::JobSummary>>,
}

/// Levanta el master real en un puerto efímero con un archivo por entrada.
async fn start_master(dir: &Path, inputs: &[&str], n_reduce: u32) -> Cluster {
    let input_dir = dir.join("input");
    fs::create_dir_all(&input_dir).unwrap();
    for (i, text) in inputs.iter().enumerate() {
        fs::write(input_dir.join(format!("in-{}.txt", i)), text).unwrap();
    }

    let cfg = MasterConfig {
        input_glob: format!("{}/*.txt", input_dir.display()),
        n_reduce,
        output_dir: dir.join("output"),
        lease_timeout: None,
        shutdown_grace: Duration::from_millis(500),
        done_poll_interval: Duration::from_millis(20),
        ..MasterConfig::default()
    };
    let state = master::build_state(&cfg).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let output_dir = cfg.output_dir.clone();
    let server_state = state.clone();
    let server = tokio::spawn(async move { master::serve(listener, server_state, &cfg).await });

    Cluster {
        base_url,
        state,
        output_dir,
        server,
    }
}

fn settings() -> LoopSettings {
    LoopSettings {
        poll_interval: Duration::from_millis(20),
        max_attempts: 5,
        retry_backoff: Duration::from_millis(10),
        max_poll_failures: 5,
    }
}

fn worker_loop(cluster: &Cluster, dir: &Path, node: &str) -> SchedulingLoop {
    let client = CoordinatorClient::new(cluster.base_url.clone()).unwrap();
    let ctx = TaskContext::local(Arc::new(WordCount), dir.join(format!("work-{}", node)));
    SchedulingLoop::new(node, Arc::new(client), ctx, 2, settings())
}

/// Lee todas las salidas: clave -> (valor, partición donde apareció).
fn read_outputs(output_dir: &Path, n_reduce: u32) -> HashMap<String, Vec<(String, u32)>> {
    let mut seen: HashMap<String, Vec<(String, u32)>> = HashMap::new();
    for p in 0..n_reduce {
        let data = fs::read_to_string(output_dir.join(output_name(p))).unwrap();
        for line in data.lines() {
            let (key, value) = line.split_once(' ').unwrap();
            seen.entry(key.to_string())
                .or_default()
                .push((value.to_string(), p));
        }
    }
    seen
}

#[tokio::test]
async fn wordcount_con_dos_archivos_y_dos_particiones() {
    let dir = temp_dir("wordcount");
    let cluster = start_master(&dir, &["a b a", "a b a"], 2).await;
    let node = worker_loop(&cluster, &dir, "n1");

    let outcome = tokio::time::timeout(Duration::from_secs(30), node.run())
        .await
        .unwrap();
    assert_eq!(outcome, LoopOutcome::JobComplete);

    let produced: Vec<_> = fs::read_dir(&cluster.output_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(produced.len(), 2);

    let seen = read_outputs(&cluster.output_dir, 2);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen["a"].len(), 1);
    assert_eq!(seen["b"].len(), 1);
    assert_eq!(seen["a"][0].0, "4");
    assert_eq!(seen["b"][0].0, "2");
    for (key, hits) in &seen {
        assert_eq!(hits[0].1, partition_for(key, 2));
    }

    let summary = tokio::time::timeout(Duration::from_secs(10), cluster.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(summary.done);
    assert_eq!(summary.maps.done, 2);
    assert_eq!(summary.reduces.done, 2);
}

#[tokio::test]
async fn dos_workers_reparten_el_trabajo_sin_duplicar_claves() {
    let dir = temp_dir("dos_workers");
    let texts = [
        "el zorro salta",
        "el perro duerme",
        "zorro perro zorro",
        "salta salta el",
    ];
    let cluster = start_master(&dir, &texts, 3).await;
    let n1 = worker_loop(&cluster, &dir, "n1");
    let n2 = worker_loop(&cluster, &dir, "n2");

    let (o1, o2) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(n1.run(), n2.run())
    })
    .await
    .unwrap();
    assert_eq!(o1, LoopOutcome::JobComplete);
    assert_eq!(o2, LoopOutcome::JobComplete);

    let seen = read_outputs(&cluster.output_dir, 3);
    let expected = [
        ("el", "3"),
        ("zorro", "3"),
        ("salta", "3"),
        ("perro", "2"),
        ("duerme", "1"),
    ];
    assert_eq!(seen.len(), expected.len());
    for (key, count) in expected {
        let hits = &seen[key];
        assert_eq!(hits.len(), 1, "{} aparece en más de una salida", key);
        assert_eq!(hits[0].0, count);
        assert_eq!(hits[0].1, partition_for(key, 3));
    }
}

#[tokio::test]
async fn nodo_declarado_caido_libera_sus_recursos() {
    let dir = temp_dir("unreachable");
    let cluster = start_master(&dir, &["uno dos", "dos tres"], 2).await;

    // un nodo toma un map y desaparece
    let ghost = CoordinatorClient::new(cluster.base_url.clone()).unwrap();
    let taken = ghost.request_task("fantasma").await.unwrap().unwrap();
    assert_eq!(taken.id(), ResourceId::map(0));

    let node = worker_loop(&cluster, &dir, "n1");
    let reset = node.declare_unreachable("fantasma").await.unwrap();
    assert_eq!(reset, vec![ResourceId::map(0)]);

    let outcome = tokio::time::timeout(Duration::from_secs(30), node.run())
        .await
        .unwrap();
    assert_eq!(outcome, LoopOutcome::JobComplete);

    let summary = cluster.state.service.summary();
    assert!(summary.done);
    assert_eq!(summary.dirty_resets, 1);

    let seen = read_outputs(&cluster.output_dir, 2);
    assert_eq!(seen["dos"][0].0, "2");
}

#[tokio::test]
async fn cliente_consulta_ubicaciones_y_estado() {
    let dir = temp_dir("client");
    let cluster = start_master(&dir, &["x"], 1).await;
    let client = CoordinatorClient::new(cluster.base_url.clone()).unwrap();

    let locations = client.resource_locations(ResourceId::map(0)).await.unwrap();
    assert_eq!(locations.len(), 1);
    assert!(locations[0].file.ends_with("in-0.txt"));

    // sin maps terminados la entrada del reduce no está lista
    match client.resource_locations(ResourceId::reduce(0)).await {
        Err(ClientError::Rejected(err)) => assert_eq!(err.kind, RpcErrorKind::InputsNotReady),
        other => panic!("se esperaba InputsNotReady, vino {:?}", other),
    }

    let err = client
        .resource_locations(ResourceId::reduce(9))
        .await
        .unwrap_err();
    assert!(err.is_rejection());

    assert!(!client.is_job_done().await.unwrap());
}

#[tokio::test]
async fn coordinador_inalcanzable_termina_el_loop() {
    let dir = temp_dir("lost");
    // puerto que nadie escucha
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = CoordinatorClient::new(format!("http://{}", addr)).unwrap();
    let ctx = TaskContext::local(Arc::new(WordCount), dir.join("work"));
    let node = SchedulingLoop::new(
        "n1",
        Arc::new(client),
        ctx,
        1,
        LoopSettings {
            max_poll_failures: 2,
            ..settings()
        },
    );

    let outcome = tokio::time::timeout(Duration::from_secs(30), node.run())
        .await
        .unwrap();
    assert_eq!(outcome, LoopOutcome::CoordinatorLost);
}
