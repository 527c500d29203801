use std::time::Duration;

/// Primera espera tras un fallo de conexión
pub const MIN_BACKOFF: Duration = Duration::from_millis(7500);
/// Techo de la espera; alcanzarlo agota los reintentos
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Backoff exponencial: 0 → min → 2x … → max
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: Duration::ZERO,
            min,
            max: max.max(min),
            attempts: 0,
        }
    }

    /// Avanza y devuelve la próxima espera
    pub fn next_delay(&mut self) -> Duration {
        self.current = if self.current.is_zero() {
            self.min
        } else {
            self.current.saturating_mul(2).min(self.max)
        };
        self.attempts += 1;
        self.current
    }

    /// Ya se esperó el máximo una vez: no hay más reintentos
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sequence_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(7500),
                Duration::from_secs(15),
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(120),
            ]
        );
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), MIN_BACKOFF);
    }
}
