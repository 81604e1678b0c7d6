use browser_zombie::testing::FakeRenderer;
use browser_zombie::{Operation, PageRequest, RenderError, Scheduler, SettlePolicy};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Small deterministic generator for latency schedules.
struct Lcg(u64);

impl Lcg {
    fn next_millis(&mut self, max: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % max
    }
}

fn page_url(index: usize) -> String {
    format!("https://example.test/page/{index}")
}

#[tokio::test(start_paused = true)]
async fn concurrent_submitters_never_overlap_renderer_calls() {
    const SUBMITTERS: usize = 4;
    const PER_SUBMITTER: usize = 6;

    for seed in [1_u64, 7, 42] {
        let mut rng = Lcg(seed);
        let mut renderer = FakeRenderer::new();
        for index in 0..SUBMITTERS * PER_SUBMITTER {
            renderer = renderer
                .with_page(&page_url(index), 200, &format!("page {index}"))
                .with_page_latency(&page_url(index), Duration::from_millis(rng.next_millis(250)));
        }
        let renderer = Arc::new(renderer);
        let scheduler = Arc::new(Scheduler::new(renderer.clone()));

        let mut tasks = Vec::new();
        for submitter in 0..SUBMITTERS {
            let scheduler = Arc::clone(&scheduler);
            let pause = rng.next_millis(50);
            tasks.push(tokio::spawn(async move {
                let mut bodies = Vec::new();
                for step in 0..PER_SUBMITTER {
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                    let url = Url::parse(&page_url(submitter * PER_SUBMITTER + step)).unwrap();
                    let handle = scheduler.submit(Operation::load(PageRequest::new(url), SettlePolicy::None));
                    let output = handle.output().await;
                    assert!(output.error.is_none(), "{:?}", output.error);
                    bodies.push(output.body.unwrap_or_default());
                }
                bodies
            }));
        }

        for (submitter, task) in tasks.into_iter().enumerate() {
            let bodies = task.await.unwrap();
            let expected: Vec<Vec<u8>> = (0..PER_SUBMITTER)
                .map(|step| format!("page {}", submitter * PER_SUBMITTER + step).into_bytes())
                .collect();
            assert_eq!(bodies, expected, "seed {seed}");
        }

        assert_eq!(renderer.max_in_flight(), 1, "seed {seed}");
        assert_eq!(renderer.navigations().await.len(), SUBMITTERS * PER_SUBMITTER);
        assert_eq!(scheduler.queued(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_operation_frees_the_worker() {
    let renderer = Arc::new(
        FakeRenderer::new()
            .with_page("https://example.test/slow", 200, "slow")
            .with_page("https://example.test/fast", 200, "fast")
            .with_page_latency("https://example.test/slow", Duration::from_secs(60)),
    );
    let scheduler = Scheduler::new(renderer.clone());

    let slow = Operation::load(
        PageRequest::new(Url::parse("https://example.test/slow").unwrap()),
        SettlePolicy::None,
    )
    .with_timeout(Duration::from_secs(1));
    let fast = Operation::load(
        PageRequest::new(Url::parse("https://example.test/fast").unwrap()),
        SettlePolicy::None,
    );

    let slow = scheduler.submit(slow);
    let fast = scheduler.submit(fast);

    assert_eq!(
        slow.output().await.error,
        Some(RenderError::Timeout(Duration::from_secs(1)))
    );
    let output = fast.output().await;
    assert_eq!(output.body, Some(b"fast".to_vec()));
    assert_eq!(renderer.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn executing_operation_can_be_cancelled() {
    let renderer = Arc::new(
        FakeRenderer::new()
            .with_page("https://example.test/slow", 200, "slow")
            .with_page_latency("https://example.test/slow", Duration::from_secs(10)),
    );
    let scheduler = Scheduler::new(renderer.clone());
    let handle = scheduler.submit(Operation::load(
        PageRequest::new(Url::parse("https://example.test/slow").unwrap()),
        SettlePolicy::None,
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.is_busy());
    handle.cancel();

    let output = handle.output().await;
    assert_eq!(output.error, Some(RenderError::Cancelled));
    assert!(output.body.is_none());
}
