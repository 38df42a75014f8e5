//! Tests for pipeline stage delivery over shared counters

#[cfg(test)]
mod tests {
    use crate::deliver::{Outbox, WorkerDeliver};
    use crate::queue::tests::support::{Collect, WakeCounter};
    use crate::queue::{FixedRing, ResizingRing, RingQueue};

    fn run_stage(
        ring: &dyn RingQueue<u32>,
        handler: &mut Collect,
        stage: usize,
        stages: usize,
        next: Option<&WakeCounter>,
    ) -> usize {
        let mut outbox = Outbox::new();
        ring.deliver_stage(
            handler,
            &mut outbox,
            stage,
            stage + 1,
            next.map(|next| next as &dyn WorkerDeliver<u32>),
            stage + 1 == stages,
        )
    }

    #[test]
    fn test_stages_see_values_in_pipeline_order() {
        let ring = FixedRing::with_counters(16, 4).unwrap();
        for value in 0..5u32 {
            assert!(ring.try_offer(value).is_ok());
        }

        let mut handlers: Vec<Collect> = (0..3).map(|_| Collect::default()).collect();

        // later stages have nothing until their predecessor publishes
        assert_eq!(run_stage(&ring, &mut handlers[2], 2, 3, None), 0);
        assert_eq!(run_stage(&ring, &mut handlers[1], 1, 3, None), 0);

        assert_eq!(run_stage(&ring, &mut handlers[0], 0, 3, None), 5);
        assert_eq!(ring.size(), 5);
        assert_eq!(run_stage(&ring, &mut handlers[1], 1, 3, None), 5);
        assert_eq!(ring.size(), 5);
        assert_eq!(run_stage(&ring, &mut handlers[2], 2, 3, None), 5);
        assert!(ring.is_empty());

        for handler in &handlers {
            assert_eq!(handler.seen, vec![0, 1, 2, 3, 4]);
        }
        assert_eq!((handlers[0].before, handlers[0].after), (1, 1));
        assert_eq!((handlers[2].before, handlers[2].after), (2, 2));
    }

    #[test]
    fn test_stage_wakes_next_per_published_chunk() {
        let ring = FixedRing::with_counters(64, 3).unwrap();
        for value in 0..6u32 {
            assert!(ring.try_offer(value).is_ok());
        }

        let next = WakeCounter::default();
        let mut handler = Collect::default();
        assert_eq!(run_stage(&ring, &mut handler, 0, 2, Some(&next)), 6);

        // chunks of 2 then 4
        assert_eq!(next.count(), 2);
        assert_eq!(ring.counters().get(1), 6);
    }

    #[test]
    fn test_tail_stage_frees_slots_for_producers() {
        let ring = FixedRing::with_counters(4, 3).unwrap();
        for value in 0..3u32 {
            assert!(ring.try_offer(value).is_ok());
        }
        assert_eq!(ring.try_offer(3), Err(3));

        let mut head = Collect::default();
        let mut tail = Collect::default();
        run_stage(&ring, &mut head, 0, 2, None);
        assert_eq!(ring.try_offer(3), Err(3));

        run_stage(&ring, &mut tail, 1, 2, None);
        assert!(ring.try_offer(3).is_ok());
    }

    #[test]
    fn test_resizing_pipeline_moves_to_grown_ring() {
        let ring = ResizingRing::with_counters(2, 64, 3).unwrap();
        for value in 0..8u32 {
            assert!(ring.try_offer(value).is_ok());
        }
        assert!(ring.ring_count() > 1);

        let mut head = Collect::default();
        let mut tail = Collect::default();

        // each round: the head stage reads the oldest ring, the tail retires it
        while !ring.is_empty() {
            run_stage(&ring, &mut head, 0, 2, None);
            run_stage(&ring, &mut tail, 1, 2, None);
        }

        assert_eq!(head.seen, (0..8).collect::<Vec<_>>());
        assert_eq!(tail.seen, (0..8).collect::<Vec<_>>());
        assert_eq!(ring.ring_count(), 1);
    }
}
