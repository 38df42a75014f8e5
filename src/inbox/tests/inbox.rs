//! Tests for inbox start, offers and shutdown on a single worker

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::core::config::QueueFullConfig;
    use crate::deliver::{InlineExecutor, RejectingExecutor, ShutdownMode, ThreadPool};
    use crate::inbox::tests::support::*;
    use crate::inbox::{Inbox, InboxBuilder, InboxError, LifecycleState, Mail, QueueFullPolicy};

    fn inline_inbox(name: &str, events: &Arc<Events>) -> Arc<Inbox<Mail<u32>>> {
        InboxBuilder::new(name)
            .executor(Arc::new(InlineExecutor))
            .build(Tally::new(events).boxed())
            .unwrap()
    }

    /// Inbox whose worker never runs, over a ring that holds three entries.
    fn stalled_inbox(name: &str) -> InboxBuilder<Ticket> {
        InboxBuilder::new(name)
            .executor(Arc::new(RejectingExecutor))
            .with_queue(|queue| queue.size(0).size_max(4))
    }

    #[test]
    fn test_first_offer_starts_inbox() {
        let events = Events::new();
        let inbox = inline_inbox("lazy", &events);
        assert_eq!(inbox.state(), LifecycleState::Uninit);
        assert!(events.all().is_empty());

        assert!(inbox.offer_and_wake(Mail::post(&inbox, 1)));

        assert_eq!(inbox.state(), LifecycleState::Active);
        assert_eq!(events.all(), vec!["init", "active", "msg:1"]);
    }

    #[test]
    fn test_start_runs_once() {
        let events = Events::new();
        let inbox = inline_inbox("once", &events);

        assert!(inbox.start());
        assert!(!inbox.start());
        inbox.init().unwrap();

        assert_eq!(events.count("init"), 1);
        assert_eq!(events.count("active"), 1);
    }

    #[test]
    fn test_journal_replay_precedes_activation() {
        let events = Events::new();
        let inbox = InboxBuilder::<Mail<u32>>::new("journal")
            .executor(Arc::new(InlineExecutor))
            .journal(true)
            .build(Tally::new(&events).boxed())
            .unwrap();

        inbox.init().unwrap();
        assert_eq!(events.all(), vec!["init", "replay", "active"]);
        assert_eq!(inbox.state(), LifecycleState::Active);
    }

    #[test]
    fn test_failed_replay_still_activates() {
        let events = Events::new();
        let inbox = InboxBuilder::<Mail<u32>>::new("journal-broken")
            .executor(Arc::new(InlineExecutor))
            .journal(true)
            .build(Tally::new(&events).failing_replay().boxed())
            .unwrap();

        inbox.init().unwrap();
        inbox.offer_and_wake(Mail::post(&inbox, 7));
        assert_eq!(events.all(), vec!["init", "replay", "active", "msg:7"]);
    }

    #[test]
    fn test_init_times_out_when_worker_never_runs() {
        let events = Events::new();
        let inbox: Arc<Inbox<Mail<u32>>> = InboxBuilder::new("stuck")
            .executor(Arc::new(RejectingExecutor))
            .journal(true)
            .init_timeout(Duration::from_millis(20))
            .build(Tally::new(&events).boxed())
            .unwrap();

        let err = inbox.init().unwrap_err();
        assert!(matches!(err, InboxError::InitTimeout { waited_ms: 20, .. }));
        assert_eq!(inbox.state(), LifecycleState::Initializing);
    }

    #[test]
    fn test_handler_sees_inbox_name_as_context() {
        let events = Events::new();
        let inbox = InboxBuilder::new("billing")
            .executor(Arc::new(InlineExecutor))
            .build(Tally::new(&events).recording_context().boxed())
            .unwrap();

        inbox.offer_and_wake(Mail::post(&inbox, 3));
        assert!(events.all().contains(&"ctx:billing".to_string()));
    }

    #[test]
    fn test_graceful_shutdown_drains_first() {
        let events = Events::new();
        let inbox = inline_inbox("graceful", &events);
        inbox.init().unwrap();

        for id in 1..=3 {
            assert!(inbox.offer(Mail::post(&inbox, id), Duration::ZERO));
        }
        inbox.shutdown(ShutdownMode::Graceful);

        assert_eq!(
            events.all(),
            vec!["init", "active", "msg:1", "msg:2", "msg:3", "shutdown:graceful"]
        );
        assert_eq!(inbox.state(), LifecycleState::Destroyed);
        assert!(inbox.is_closed());

        inbox.shutdown(ShutdownMode::Immediate);
        assert_eq!(events.count("shutdown:immediate"), 0);
    }

    #[test]
    fn test_offer_after_shutdown_fails_message() {
        let events = Events::new();
        let failures = Failures::new();
        let inbox = InboxBuilder::new("closed")
            .executor(Arc::new(InlineExecutor))
            .build(Tally::new(&events).boxed())
            .unwrap();

        inbox.init().unwrap();
        inbox.shutdown(ShutdownMode::Graceful);

        assert!(inbox.offer(Ticket::job(&inbox, 9, &failures), Duration::ZERO));
        assert!(!inbox.offer_result(Ticket::job(&inbox, 10, &failures)));

        assert_eq!(failures.ids(), vec![9, 10]);
        assert!(failures.messages()[0].contains("closed"));
        assert_eq!(events.ids(), Vec::<u32>::new());
        assert!(matches!(inbox.init(), Err(InboxError::Closed { .. })));
    }

    #[test]
    fn test_immediate_shutdown_closes_worker() {
        let events = Events::new();
        let failures = Failures::new();
        let inbox = stalled_inbox("immediate")
            .build(Tally::new(&events).boxed())
            .unwrap();

        // init and active signals take two of the three slots
        assert!(inbox.offer(Ticket::job(&inbox, 1, &failures), Duration::ZERO));
        assert_eq!(inbox.size(), 3);

        inbox.shutdown(ShutdownMode::Immediate);

        assert_eq!(events.all(), vec!["shutdown:immediate"]);
        assert!(inbox.worker().is_closed());
        assert!(inbox.worker().state_string().contains("CLOSED"));
        assert!(inbox.queue().queue().is_shutdown());
        assert!(!inbox.wake());

        assert!(inbox.offer(Ticket::job(&inbox, 2, &failures), Duration::ZERO));
        assert_eq!(failures.ids(), vec![2]);
        assert_eq!(inbox.size(), 3);
    }

    #[test]
    fn test_full_queue_goes_to_handler() {
        let events = Events::new();
        let failures = Failures::new();
        let recorder = Arc::new(FullRecorder::default());
        let inbox = stalled_inbox("crowded")
            .full_handler(recorder.clone())
            .build(Tally::new(&events).boxed())
            .unwrap();

        assert!(inbox.offer(Ticket::job(&inbox, 1, &failures), Duration::ZERO));
        assert!(!inbox.offer(Ticket::job(&inbox, 2, &failures), Duration::ZERO));
        assert!(!inbox.offer(Ticket::job(&inbox, 3, &failures), Duration::from_millis(5)));

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![("crowded".to_string(), 3, 2), ("crowded".to_string(), 3, 3)]
        );
        assert_eq!(failures.len(), 0);
    }

    #[test]
    fn test_default_policy_fails_rejected_message() {
        let events = Events::new();
        let failures = Failures::new();
        let policy = QueueFullPolicy::with_fatal(QueueFullConfig::default(), Box::new(|_| {}));
        let inbox = stalled_inbox("rejecting")
            .full_handler(Arc::new(policy))
            .build(Tally::new(&events).boxed())
            .unwrap();

        inbox.offer(Ticket::job(&inbox, 1, &failures), Duration::ZERO);
        assert!(!inbox.offer(Ticket::job(&inbox, 2, &failures), Duration::ZERO));

        assert_eq!(failures.ids(), vec![2]);
        assert_eq!(
            failures.messages()[0],
            "full queue rejecting with 3 entries after 0ms at message ticket 2"
        );
    }

    #[test]
    fn test_send_timeout_caps_offer_wait() {
        let events = Events::new();
        let failures = Failures::new();
        let recorder = Arc::new(FullRecorder::default());
        let inbox = stalled_inbox("capped")
            .send_timeout(Duration::from_millis(10))
            .full_handler(recorder.clone())
            .build(Tally::new(&events).boxed())
            .unwrap();

        inbox.offer(Ticket::job(&inbox, 1, &failures), Duration::ZERO);

        let started = std::time::Instant::now();
        assert!(!inbox.offer(Ticket::job(&inbox, 2, &failures), Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn test_pool_inbox_delivers_in_order() {
        let pool = Arc::new(ThreadPool::new("inbox-order", 2).unwrap());
        let events = Events::new();
        let inbox = InboxBuilder::new("ordered")
            .executor(pool.clone())
            .build(Tally::new(&events).boxed())
            .unwrap();

        inbox.init().unwrap();
        for id in 0..500 {
            assert!(inbox.offer_and_wake(Mail::post(&inbox, id)));
        }

        assert!(wait_for(|| events.ids().len() == 500));
        assert_eq!(events.ids(), (0..500).collect::<Vec<u32>>());

        inbox.shutdown(ShutdownMode::Graceful);
        assert_eq!(events.count("shutdown:graceful"), 1);
        pool.shutdown();
    }

    fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while std::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        check()
    }
}
