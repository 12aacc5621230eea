use historydb::{
    try_create_history_client, ActiveUsersQuery, AddActivityInput, AddLogInput, BucketRange, GroupId,
    HistoryClientConfig, HistoryOptions, MemoryStore, MemoryStoreConnector, UserLogsQuery,
};
use slog::Drain;
use std::error::Error;
use std::time::Duration;

// Writes a few records through a flaky in-process store and reads them back.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger();

    let groups: Vec<GroupId> = (1..=3).map(GroupId::new).collect();
    let store = MemoryStore::new(&groups)
        .with_min_writes(2)
        .with_latency(Duration::from_millis(5))
        .with_group_failure_probability(0.2);

    let client = try_create_history_client(
        HistoryClientConfig {
            servers: vec!["localhost:1025".to_string()],
            groups,
            info_logger: logger.clone(),
            options: HistoryOptions::default(),
        },
        &MemoryStoreConnector::new(store),
    )
    .await?;

    for user in &["alice", "bob", "carol"] {
        for i in 0..3 {
            let line = format!("{} did thing {}\n", user, i);
            client.add_log_with_activity(AddLogInput::new(*user, line)).await;
        }
    }
    client.add_activity(AddActivityInput::new("dave")).await;

    let output = client.flush(Some(Duration::from_secs(5))).await?;
    slog::info!(logger, "Flushed: {:?}", output);

    let users = client.get_active_users(ActiveUsersQuery::default()).await;
    slog::info!(logger, "Active users: {:?}", users);

    for user in users {
        let logs = client
            .get_user_logs(UserLogsQuery {
                user: user.clone(),
                range: BucketRange::default(),
            })
            .await;

        for entry in logs {
            slog::info!(
                logger,
                "{:?} @ {}: {:?}",
                user,
                entry.key,
                String::from_utf8_lossy(&entry.data)
            );
        }
    }

    slog::info!(logger, "Done. Each write needed {} acks.", client.min_writes());
    client.shutdown().await;

    Ok(())
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
