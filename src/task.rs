/// Runs `$task(&ctx, data)` every `$interval` seconds on its own tokio task,
/// errors are logged and the schedule carries on
#[macro_export]
macro_rules! spawn_task {
    ( $interval:expr, $task:expr, $ctx:ident, $data:ident ) => {
        use tokio::spawn;
        use tokio_schedule::{every, Job};
        use tracing::{debug, error, info};

        {
            let interval: u32 = $interval;
            let data = $data.to_owned();
            let ctx = $ctx.to_owned();

            info!(interval, "scheduling {}", stringify!($task));
            spawn(every(interval).seconds().perform(move || {
                let data = data.to_owned();
                let ctx = ctx.to_owned();

                async move {
                    let started = std::time::Instant::now();
                    if let Err(err) = $task(&ctx, data.clone()).await {
                        error!("error executing {}: {}", stringify!($task), err)
                    }
                    debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "executed {}",
                        stringify!($task)
                    );
                }
            }));
        }
    };
}
