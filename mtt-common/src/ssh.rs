//! Remote execution over `ssh`/`scp`.
//!
//! Entities are launched with `nohup ... & echo $!` so the remote shell
//! returns immediately with the parent process id. Every remote command is
//! bounded by the configured command timeout. Hosts named `localhost` or
//! `127.0.0.1` run through a local `sh -c` instead.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster::ClusterEntityConfig;
use crate::config::RemoteSettings;
use crate::environment::{CaseEnv, TestEnvironment, ValidationCheck};
use crate::errors::{HarnessError, HarnessResult};
use crate::properties::{apply_overrides, connect_strings};
use crate::types::{Entity, ProcessHandle, Role};
use crate::{metrics, validation};

const DEFAULT_TOPIC: &str = "test_1";
const DEFAULT_MESSAGES_PER_ROUND: u64 = 500;
const DEFAULT_MESSAGE_SIZE: u64 = 100;
const DEFAULT_CONSUMER_TIMEOUT_MS: u64 = 10_000;

/// Run filesystem-heavy work off the runtime threads.
async fn blocking<T, F>(work: F) -> HarnessResult<T>
where
    F: FnOnce() -> HarnessResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HarnessError::Io(std::io::Error::other(e)))?
}

fn escape(text: &str) -> String {
    shell_escape::escape(text.into()).into_owned()
}

pub fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1")
}

/// Parse the pid echoed by a background launch (last non-empty line).
pub fn parse_pid(stdout: &str) -> Option<ProcessHandle> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .map(ProcessHandle)
}

fn kafka_home(config: &ClusterEntityConfig) -> String {
    if config.kafka_home == "default" {
        "${KAFKA_HOME:-.}".to_string()
    } else {
        escape(&config.kafka_home)
    }
}

/// JVM system property carrying the case signature, so `pkill -f` matches
/// every role's process whatever its own arguments are.
const SIGNATURE_PROPERTY: &str = "mtt.case";

fn env_prefix(case: &CaseEnv, config: &ClusterEntityConfig) -> String {
    // kafka-run-class.sh appends KAFKA_OPTS to the java command line.
    let mut prefix = format!(
        "KAFKA_OPTS={} ",
        escape(&format!("-D{SIGNATURE_PROPERTY}={}", case.signature()))
    );
    if config.java_home != "default" {
        prefix.push_str(&format!("JAVA_HOME={} ", escape(&config.java_home)));
    }
    if let Some(port) = &config.jmx_port {
        prefix.push_str(&format!("JMX_PORT={} ", escape(port)));
    }
    prefix
}

fn entity_override<'a>(case: &'a CaseEnv, entity: &Entity, key: &str) -> Option<&'a str> {
    case.definition
        .entity(entity.id.as_str())
        .and_then(|e| e.overrides.get(key))
        .map(String::as_str)
}

fn numeric_override(case: &CaseEnv, entity: &Entity, key: &str, default: u64) -> u64 {
    entity_override(case, entity, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Topic used by the producer and consumer of a case.
pub fn topic_for(case: &CaseEnv) -> String {
    case.definition
        .arg("topic")
        .or_else(|| {
            case.definition
                .entities
                .iter()
                .find_map(|e| e.overrides.get("topic").cloned())
        })
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
}

/// Coordination connect string of the cluster an entity talks to.
fn connect_for(case: &CaseEnv, cluster_name: &str) -> String {
    let connect = connect_strings(&case.cluster, &case.definition);
    connect
        .get(cluster_name)
        .or_else(|| connect.get("source"))
        .cloned()
        .unwrap_or_else(|| "localhost:2181".to_string())
}

/// Foreground command line for a long-running entity.
pub fn launch_command(case: &CaseEnv, entity: &Entity, config: &ClusterEntityConfig) -> String {
    let home = kafka_home(config);
    let props = escape(&case.entity_config_file(entity).display().to_string());
    let command = match entity.role {
        Role::Zookeeper => format!("{home}/bin/zookeeper-server-start.sh {props}"),
        Role::Broker => format!("{home}/bin/kafka-server-start.sh {props}"),
        Role::MigrationTool => format!(
            "{home}/bin/kafka-run-class.sh kafka.tools.KafkaMigrationTool \
             --consumer.config {props} --producer.config {props} --whitelist='.*' \
             --num.producers {} --num.streams {}",
            numeric_override(case, entity, "num.producers", 1),
            numeric_override(case, entity, "num.streams", 1),
        ),
        Role::ConsoleConsumer => format!(
            "{home}/bin/kafka-run-class.sh kafka.consumer.ConsoleConsumer \
             --consumer.config {props} --zookeeper {} --topic {} \
             --consumer-timeout-ms {} --from-beginning",
            escape(&connect_for(case, &config.cluster_name)),
            escape(&topic_for(case)),
            numeric_override(
                case,
                entity,
                "consumer-timeout-ms",
                DEFAULT_CONSUMER_TIMEOUT_MS
            ),
        ),
        Role::ProducerPerformance => producer_command(case, entity, config, 0),
    };
    format!("{}{command}", env_prefix(case, config))
}

/// One bounded producer batch starting at `first_message_id`.
pub fn producer_command(
    case: &CaseEnv,
    entity: &Entity,
    config: &ClusterEntityConfig,
    first_message_id: u64,
) -> String {
    format!(
        "{}/bin/kafka-run-class.sh kafka.perf.ProducerPerformance \
         --brokerinfo zk.connect={} --topic {} --messages {} --message-size {} \
         --threads 1 --compression-codec 0 --initial-message-id {first_message_id}",
        kafka_home(config),
        escape(&connect_for(case, "source")),
        escape(&topic_for(case)),
        numeric_override(case, entity, "messages", DEFAULT_MESSAGES_PER_ROUND),
        numeric_override(case, entity, "message-size", DEFAULT_MESSAGE_SIZE),
    )
}

/// Foreground script for one producer round, appending to the entity log.
pub fn producer_round_script(
    case: &CaseEnv,
    entity: &Entity,
    config: &ClusterEntityConfig,
    first_message_id: u64,
) -> String {
    format!(
        "mkdir -p {dir} && {env}{cmd} >> {log} 2>&1",
        dir = escape(&case.entity_log_dir(entity).display().to_string()),
        env = env_prefix(case, config),
        cmd = producer_command(case, entity, config, first_message_id),
        log = escape(&case.entity_log_file(entity).display().to_string()),
    )
}

/// `nohup` wrapper returning the background pid on stdout.
pub fn background_script(log_dir: &Path, log_file: &Path, command: &str) -> String {
    format!(
        "mkdir -p {dir} && nohup {command} > {log} 2>&1 & echo $!",
        dir = escape(&log_dir.display().to_string()),
        log = escape(&log_file.display().to_string()),
    )
}

/// Terminate a launched entity and its children. Succeeds when already gone.
pub fn stop_script(handle: ProcessHandle) -> String {
    format!("pkill -TERM -P {handle} 2>/dev/null; kill -TERM {handle} 2>/dev/null; true")
}

pub fn force_terminate_script(signature: &str) -> String {
    format!("pkill -TERM -f {} 2>/dev/null; true", escape(signature))
}

/// Drives real hosts through the system `ssh` and `scp` binaries.
#[derive(Debug)]
pub struct SshEnvironment {
    remote: RemoteSettings,
    next_message_id: AtomicU64,
}

impl SshEnvironment {
    pub fn new(remote: RemoteSettings) -> Self {
        Self {
            remote,
            next_message_id: AtomicU64::new(0),
        }
    }

    fn target(&self, host: &str) -> String {
        match &self.remote.ssh_user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.remote.connect_timeout_secs),
        ]
    }

    /// Run `script` on `host` and return its stdout.
    async fn run(&self, host: &str, script: &str) -> HarnessResult<String> {
        let mut cmd = if is_local(host) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.args(self.ssh_options()).arg(self.target(host)).arg(script);
            cmd
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        debug!(component = "SshEnvironment", host, script, "Running remote command");
        self.finish(host, cmd).await
    }

    async fn finish(&self, host: &str, mut cmd: Command) -> HarnessResult<String> {
        let timeout = self.remote.command_timeout();
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| HarnessError::RemoteTimeout {
                host: host.to_string(),
                timeout,
            })?
            .map_err(|e| HarnessError::RemoteCommand {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(HarnessError::RemoteCommand {
                host: host.to_string(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Copy the contents of `remote_dir` on `host` into `local_dir`.
    async fn copy_dir(&self, host: &str, remote_dir: &Path, local_dir: &Path) -> HarnessResult<()> {
        tokio::fs::create_dir_all(local_dir).await?;
        if is_local(host) {
            if remote_dir == local_dir {
                return Ok(());
            }
            let script = format!(
                "if [ -d {src} ]; then cp -r {src}/. {dst}/; fi",
                src = escape(&remote_dir.display().to_string()),
                dst = escape(&local_dir.display().to_string()),
            );
            return self.run(host, &script).await.map(|_| ());
        }
        let mut cmd = Command::new("scp");
        cmd.args(self.ssh_options())
            .arg("-r")
            .arg(format!("{}:{}/.", self.target(host), remote_dir.display()))
            .arg(local_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        self.finish(host, cmd).await.map(|_| ())
    }

    fn config_of<'a>(
        &self,
        case: &'a CaseEnv,
        entity: &Entity,
    ) -> HarnessResult<&'a ClusterEntityConfig> {
        case.cluster
            .entity(entity.id.as_str())
            .ok_or_else(|| HarnessError::UnknownEntity(entity.id.clone()))
    }

    fn entities(case: &CaseEnv) -> Vec<Entity> {
        case.cluster
            .entities
            .iter()
            .map(|c| Entity::new(c.entity_id.clone(), c.role, c.hostname.clone()))
            .collect()
    }

    /// Data directory an entity writes to, from its test-case overrides.
    fn data_dir(case: &CaseEnv, entity: &Entity) -> Option<String> {
        let key = match entity.role {
            Role::Zookeeper => "dataDir",
            Role::Broker => "log.dir",
            _ => return None,
        };
        entity_override(case, entity, key).map(str::to_string)
    }
}

impl TestEnvironment for SshEnvironment {
    async fn prepare_log_dirs(&self, case: &CaseEnv) -> HarnessResult<()> {
        tokio::fs::create_dir_all(&case.dashboards_dir).await?;
        for entity in Self::entities(case) {
            let log_dir = case.entity_log_dir(&entity);
            tokio::fs::create_dir_all(&log_dir).await?;

            let mut script = format!("mkdir -p {}", escape(&log_dir.display().to_string()));
            if let Some(data_dir) = Self::data_dir(case, &entity) {
                info!(
                    component = "SshEnvironment",
                    entity = %entity.id,
                    host = %entity.host,
                    data_dir,
                    "Removing stale data directory"
                );
                script = format!("rm -rf {}; {script}", escape(&data_dir));
            }
            if !is_local(&entity.host) || Self::data_dir(case, &entity).is_some() {
                self.run(&entity.host, &script).await?;
            }
        }
        Ok(())
    }

    async fn generate_properties(&self, case: &CaseEnv) -> HarnessResult<()> {
        let generated = {
            let case = case.clone();
            blocking(move || {
                apply_overrides(
                    &case.base_config_dir(),
                    &case.config_dir,
                    &case.cluster,
                    &case.definition,
                )
            })
            .await?
        };
        debug!(
            component = "SshEnvironment",
            testcase = %case.name(),
            files = generated.len(),
            "Generated entity properties"
        );

        // Remote hosts read the same paths, so ship the generated files there.
        for host in case.cluster.hosts() {
            if is_local(&host) {
                continue;
            }
            let dir = escape(&case.config_dir.display().to_string());
            self.run(&host, &format!("mkdir -p {dir}")).await?;
            let mut cmd = Command::new("scp");
            cmd.args(self.ssh_options())
                .args(&generated)
                .arg(format!("{}:{}/", self.target(&host), case.config_dir.display()))
                .stdin(Stdio::null())
                .kill_on_drop(true);
            self.finish(&host, cmd).await?;
        }
        Ok(())
    }

    async fn start_entity(&self, case: &CaseEnv, entity: &Entity) -> HarnessResult<ProcessHandle> {
        let config = self.config_of(case, entity)?;
        let command = launch_command(case, entity, config);
        let script = background_script(
            &case.entity_log_dir(entity),
            &case.entity_log_file(entity),
            &command,
        );
        let stdout = self
            .run(&entity.host, &script)
            .await
            .map_err(|e| HarnessError::StartFailed {
                entity: entity.id.clone(),
                role: entity.role,
                host: entity.host.clone(),
                reason: e.to_string(),
            })?;
        parse_pid(&stdout).ok_or_else(|| HarnessError::StartFailed {
            entity: entity.id.clone(),
            role: entity.role,
            host: entity.host.clone(),
            reason: format!("no pid in launch output: {}", stdout.trim()),
        })
    }

    async fn stop_entity(
        &self,
        _case: &CaseEnv,
        entity: &Entity,
        handle: ProcessHandle,
    ) -> HarnessResult<()> {
        self.run(&entity.host, &stop_script(handle))
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::StopFailed {
                entity: entity.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn create_topics(&self, case: &CaseEnv) -> HarnessResult<()> {
        let broker = case
            .cluster
            .of_role(Role::Broker)
            .find(|b| b.cluster_name == "target")
            .or_else(|| case.cluster.of_role(Role::Broker).next())
            .ok_or(HarnessError::NoEntityForRole(Role::Broker))?;
        let script = format!(
            "{}/bin/kafka-run-class.sh kafka.admin.CreateTopicCommand \
             --zookeeper {} --topic {} --partition 1 --replica 1",
            kafka_home(broker),
            escape(&connect_for(case, &broker.cluster_name)),
            escape(&topic_for(case)),
        );
        self.run(&broker.hostname, &script).await.map(|_| ())
    }

    async fn run_producer_round(&self, case: &CaseEnv, entity: &Entity) -> HarnessResult<()> {
        let config = self.config_of(case, entity)?;
        let batch = numeric_override(case, entity, "messages", DEFAULT_MESSAGES_PER_ROUND);
        let first = self.next_message_id.fetch_add(batch, Ordering::SeqCst);
        let script = producer_round_script(case, entity, config, first);
        self.run(&entity.host, &script).await.map(|_| ())
    }

    async fn force_terminate_matching(&self, case: &CaseEnv, signature: &str) -> HarnessResult<()> {
        let script = force_terminate_script(signature);
        for host in case.cluster.hosts() {
            if let Err(e) = self.run(&host, &script).await {
                warn!(component = "SshEnvironment", host, error = %e, "Force terminate failed");
            }
        }
        Ok(())
    }

    async fn collect_remote_logs(&self, case: &CaseEnv) -> HarnessResult<()> {
        for entity in Self::entities(case) {
            let log_dir = case.entity_log_dir(&entity);
            if !is_local(&entity.host) {
                self.copy_dir(&entity.host, &log_dir, &log_dir).await?;
            }
            if entity.role == Role::Broker
                && let Some(data_dir) = Self::data_dir(case, &entity)
            {
                let local = log_dir.join(validation::BROKER_DATA_SUBDIR);
                self.copy_dir(&entity.host, Path::new(&data_dir), &local)
                    .await?;
            }
        }
        Ok(())
    }

    async fn validate_data_equivalence(&self, case: &CaseEnv) -> HarnessResult<ValidationCheck> {
        let logs_dir = case.logs_dir.clone();
        blocking(move || validation::validate_message_logs(&logs_dir)).await
    }

    async fn validate_checksum_equivalence(
        &self,
        case: &CaseEnv,
    ) -> HarnessResult<ValidationCheck> {
        let case = case.clone();
        blocking(move || validation::validate_broker_segments(&case)).await
    }

    async fn render_graphs(&self, case: &CaseEnv) -> HarnessResult<()> {
        let case = case.clone();
        blocking(move || metrics::render_graphs(&case).map(|_| ())).await
    }

    async fn render_dashboards(&self, case: &CaseEnv) -> HarnessResult<()> {
        let case = case.clone();
        blocking(move || metrics::render_dashboards(&case).map(|_| ())).await
    }
}
