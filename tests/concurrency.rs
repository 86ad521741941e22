mod common;

use std::{
    hint,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use common::*;
use event_timer_rs::*;

fn shared_timer(interval_ms: u64) -> (Arc<Timer>, Arc<ManualScheduler>) {
    init_logger();

    let scheduler = ManualScheduler::new();

    let timer = Timer::with_scheduler(Duration::from_millis(interval_ms), scheduler.clone())
        .expect("valid interval");

    (Arc::new(timer), scheduler)
}

fn counting_handler(timer: &Timer) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let count_handler = count.clone();

    timer.on_elapsed(move |_, _| {
        count_handler.fetch_add(1, Ordering::SeqCst);
    });

    count
}

#[test]
fn test_one_shot_fire_races_restart() {
    for _ in 0..2_000 {
        let (timer, scheduler) = shared_timer(100);

        timer.set_auto_reset(false);

        let count = counting_handler(&timer);

        timer.start().unwrap();

        let index = scheduler.arm_count() - 1;

        let driver = {
            let scheduler = scheduler.clone();

            thread::spawn(move || scheduler.fire(index))
        };

        let app = {
            let timer = timer.clone();

            thread::spawn(move || {
                while timer.enabled() {
                    hint::spin_loop();
                }

                timer.start().unwrap();
            })
        };

        driver.join().unwrap();
        app.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(timer.enabled());
        assert_eq!(scheduler.arm_count(), 2);

        scheduler.assert_consistent(&timer);

        // the restarted arm is still deliverable
        scheduler.fire_last();

        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.assert_consistent(&timer);
    }
}

#[test]
fn test_one_shot_fire_races_reconfigure() {
    for _ in 0..500 {
        let (timer, scheduler) = shared_timer(100);

        timer.set_auto_reset(false);
        timer.start().unwrap();

        let index = scheduler.arm_count() - 1;

        let driver = {
            let scheduler = scheduler.clone();

            thread::spawn(move || scheduler.fire(index))
        };

        for millis in 1..=8 {
            let _ = timer.set_interval(Duration::from_millis(millis));
        }

        driver.join().unwrap();

        scheduler.assert_consistent(&timer);
    }
}

#[test]
fn test_fires_race_stop_and_reconfigure() {
    let (timer, scheduler) = shared_timer(100);

    let count = counting_handler(&timer);

    timer.start().unwrap();

    let driver = {
        let timer = timer.clone();
        let scheduler = scheduler.clone();

        thread::spawn(move || {
            for _ in 0..5_000 {
                scheduler.fire_current(&timer);
            }
        })
    };

    for i in 0..2_000u64 {
        match i % 5 {
            0 => timer.stop(),
            1 => timer.start().unwrap(),
            2 => timer.set_interval(Duration::from_millis(10 + i % 7)).unwrap(),
            3 => timer.set_auto_reset(i % 2 == 0),
            _ => timer.start().unwrap(),
        }

        if i % 100 == 0 {
            thread::yield_now();
        }
    }

    driver.join().unwrap();

    scheduler.assert_consistent(&timer);

    timer.set_auto_reset(true);
    timer.start().unwrap();

    scheduler.assert_consistent(&timer);

    let delivered = count.load(Ordering::SeqCst);

    scheduler.fire_current(&timer);

    assert_eq!(count.load(Ordering::SeqCst), delivered + 1);

    timer.stop();

    scheduler.assert_consistent(&timer);
}

#[test]
fn test_handler_churn_during_delivery() {
    let (timer, scheduler) = shared_timer(100);

    let count = counting_handler(&timer);

    timer.start().unwrap();

    let driver = {
        let scheduler = scheduler.clone();

        thread::spawn(move || {
            for _ in 0..2_000 {
                scheduler.fire(0);
            }
        })
    };

    let churn: ElapsedHandler = Arc::new(|_: &TimerRef, _: &ElapsedEventArgs| {});

    for _ in 0..2_000 {
        let id = timer.on_elapsed(|_, _| {});

        timer.add_handler(churn.clone());

        assert!(timer.remove_handler(id));
        assert!(timer.remove_handler_instance(&churn));
    }

    driver.join().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2_000);
    assert_eq!(timer.handler_count(), 1);

    scheduler.assert_consistent(&timer);
}
