//! Pick-control output latch.
//!
//! The reader feeds a card while the pick-control line is low. The line is
//! driven from both the main loop (host commands) and the edge handlers
//! (end of card, empty hopper), so the pin lives behind a critical section.

use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::digital::OutputPin;
use portable_atomic::{AtomicBool, Ordering};

/// Shared pick-control line. High pauses feeding.
pub struct PickControl<P> {
    pin: Mutex<RefCell<P>>,
    paused: AtomicBool,
}

impl<P: OutputPin> PickControl<P> {
    /// Take ownership of the pin and drive it to the paused level.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the line cannot be driven.
    pub fn new(mut pin: P) -> Result<Self, P::Error> {
        pin.set_high()?;
        Ok(Self {
            pin: Mutex::new(RefCell::new(pin)),
            paused: AtomicBool::new(true),
        })
    }

    /// Stop feeding cards.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the line cannot be driven.
    pub fn pause(&self) -> Result<(), P::Error> {
        self.drive(true)
    }

    /// Let the reader feed cards.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the line cannot be driven.
    pub fn feed(&self) -> Result<(), P::Error> {
        self.drive(false)
    }

    /// Last level driven on the line.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn drive(&self, paused: bool) -> Result<(), P::Error> {
        critical_section::with(|cs| {
            let mut pin = self.pin.borrow_ref_mut(cs);
            if paused {
                pin.set_high()?;
            } else {
                pin.set_low()?;
            }
            self.paused.store(paused, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::convert::Infallible;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::vec::Vec;

    #[derive(Clone, Default)]
    struct MockPin {
        levels: Arc<StdMutex<Vec<bool>>>,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.lock().unwrap().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.lock().unwrap().push(true);
            Ok(())
        }
    }

    #[test]
    fn test_starts_paused() {
        let pin = MockPin::default();
        let pick = PickControl::new(pin.clone()).unwrap();
        assert!(pick.is_paused());
        assert_eq!(*pin.levels.lock().unwrap(), [true]);
    }

    #[test]
    fn test_feed_then_pause() {
        let pin = MockPin::default();
        let pick = PickControl::new(pin.clone()).unwrap();

        pick.feed().unwrap();
        assert!(!pick.is_paused());
        pick.pause().unwrap();
        assert!(pick.is_paused());

        assert_eq!(*pin.levels.lock().unwrap(), [true, false, true]);
    }
}
