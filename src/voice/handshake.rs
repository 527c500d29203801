use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    error::{LavalinkError, Result},
    gateway::{VoiceServerAssigned, VoiceStateAssigned},
    model::{ChannelId, GuildId, VoiceState},
};

/// Las dos mitades de las credenciales de voz
#[derive(Debug, Default)]
struct Slots {
    session_id: Option<String>,
    server: Option<(String, String)>,
    /// Últimas credenciales entregadas al nodo para esta guild
    delivered: Option<VoiceState>,
}

impl Slots {
    /// Solo devuelve credenciales con ambos slots llenos
    fn merged(&self) -> Option<VoiceState> {
        let session_id = self.session_id.as_ref()?;
        let (token, endpoint) = self.server.as_ref()?;
        Some(VoiceState {
            token: token.clone(),
            endpoint: endpoint.clone(),
            session_id: session_id.clone(),
        })
    }
}

#[derive(Debug)]
struct PendingHandshake {
    channel_id: ChannelId,
    slots: Slots,
    completion: oneshot::Sender<VoiceState>,
}

/// Resultado de ofrecer una mitad de las credenciales
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Falta la otra mitad
    Incomplete,
    /// Se completó un handshake pendiente y se despertó al `connect`
    Delivered,
    /// Se completó un re-handshake para un player existente
    Rehandshake(VoiceState),
    /// No hay handshake ni player para la guild
    Ignored,
}

/// Punto de encuentro por guild entre el voice state y el voice server
#[derive(Debug, Default)]
pub struct VoiceHandshakeCoordinator {
    pending: DashMap<GuildId, PendingHandshake>,
    rehandshakes: DashMap<GuildId, Slots>,
}

impl VoiceHandshakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un handshake para la guild. El receiver se resuelve una sola
    /// vez, cuando ambas mitades están presentes; si el handshake se descarta
    /// el sender se suelta y el receiver devuelve error.
    pub fn begin(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<oneshot::Receiver<VoiceState>> {
        let (completion, receiver) = oneshot::channel();

        match self.pending.entry(guild_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LavalinkError::HandshakeInProgress(guild_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PendingHandshake {
                    channel_id,
                    slots: Slots::default(),
                    completion,
                });
                self.rehandshakes.remove(&guild_id);
                debug!(guild = %guild_id, channel = %channel_id, "Handshake de voz registrado");
                Ok(receiver)
            }
        }
    }

    pub fn is_pending(&self, guild_id: GuildId) -> bool {
        self.pending.contains_key(&guild_id)
    }

    /// Canal solicitado por el handshake pendiente, si lo hay
    pub fn pending_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.pending.get(&guild_id).map(|pending| pending.channel_id)
    }

    /// Descarta cualquier estado parcial de la guild
    pub fn discard(&self, guild_id: GuildId) -> bool {
        let pending = self.pending.remove(&guild_id).is_some();
        let partial = self.rehandshakes.remove(&guild_id).is_some();
        pending || partial
    }

    pub fn offer_state(&self, event: VoiceStateAssigned, has_player: bool) -> HandshakeOutcome {
        let guild_id = event.guild_id;

        if event.channel_id.is_none() {
            // El bot salió antes de completar: se descarta todo
            if self.discard(guild_id) {
                info!(guild = %guild_id, "Handshake de voz descartado, el bot salió del canal");
            }
            return HandshakeOutcome::Ignored;
        }

        self.fill(guild_id, has_player, |slots| {
            slots.session_id = Some(event.session_id)
        })
    }

    pub fn offer_server(&self, event: VoiceServerAssigned, has_player: bool) -> HandshakeOutcome {
        let guild_id = event.guild_id;

        let Some(endpoint) = event.endpoint else {
            debug!(guild = %guild_id, "Voice server sin endpoint, esperando reasignación");
            return HandshakeOutcome::Incomplete;
        };

        self.fill(guild_id, has_player, |slots| {
            slots.server = Some((event.token, endpoint))
        })
    }

    fn fill(
        &self,
        guild_id: GuildId,
        has_player: bool,
        apply: impl FnOnce(&mut Slots),
    ) -> HandshakeOutcome {
        let completed = match self.pending.get_mut(&guild_id) {
            Some(mut pending) => {
                apply(&mut pending.slots);
                pending.slots.merged().is_some()
            }
            None => return self.fill_rehandshake(guild_id, has_player, apply),
        };

        if !completed {
            return HandshakeOutcome::Incomplete;
        }

        // `remove` es atómico: solo un llamador entrega las credenciales
        let Some((_, pending)) = self.pending.remove(&guild_id) else {
            return HandshakeOutcome::Incomplete;
        };
        let Some(voice) = pending.slots.merged() else {
            return HandshakeOutcome::Incomplete;
        };

        if pending.completion.send(voice.clone()).is_err() {
            debug!(guild = %guild_id, "El connect ya no espera el handshake");
            return HandshakeOutcome::Ignored;
        }

        // Una migración de región puede traer solo una de las dos mitades
        self.rehandshakes.insert(
            guild_id,
            Slots {
                delivered: Some(voice),
                ..pending.slots
            },
        );

        debug!(guild = %guild_id, "Handshake de voz completado");
        HandshakeOutcome::Delivered
    }

    fn fill_rehandshake(
        &self,
        guild_id: GuildId,
        has_player: bool,
        apply: impl FnOnce(&mut Slots),
    ) -> HandshakeOutcome {
        if !has_player {
            return HandshakeOutcome::Ignored;
        }

        let mut slots = self.rehandshakes.entry(guild_id).or_default();
        apply(&mut slots);

        let Some(voice) = slots.merged() else {
            return HandshakeOutcome::Incomplete;
        };
        if slots.delivered.as_ref() == Some(&voice) {
            // Mute/deaf y otros cambios repiten las mismas credenciales
            return HandshakeOutcome::Ignored;
        }

        slots.delivered = Some(voice.clone());
        debug!(guild = %guild_id, "Re-handshake de voz completado");
        HandshakeOutcome::Rehandshake(voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot::error::TryRecvError;

    const GUILD: GuildId = GuildId(81384788765712384);
    const CHANNEL: ChannelId = ChannelId(81384788765712385);

    fn state() -> VoiceStateAssigned {
        VoiceStateAssigned {
            guild_id: GUILD,
            session_id: "voice-session".into(),
            channel_id: Some(CHANNEL),
        }
    }

    fn server() -> VoiceServerAssigned {
        VoiceServerAssigned {
            guild_id: GUILD,
            token: "voice-token".into(),
            endpoint: Some("us-east1.discord.media:443".into()),
        }
    }

    fn expected() -> VoiceState {
        VoiceState {
            token: "voice-token".into(),
            endpoint: "us-east1.discord.media:443".into(),
            session_id: "voice-session".into(),
        }
    }

    #[test]
    fn test_server_alone_does_not_complete() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let mut receiver = coordinator.begin(GUILD, CHANNEL).unwrap();

        assert_eq!(coordinator.offer_server(server(), false), HandshakeOutcome::Incomplete);
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
        assert!(coordinator.is_pending(GUILD));
    }

    #[test]
    fn test_both_halves_in_either_order_complete_once() {
        for state_first in [true, false] {
            let coordinator = VoiceHandshakeCoordinator::new();
            let mut receiver = coordinator.begin(GUILD, CHANNEL).unwrap();

            let outcomes = if state_first {
                vec![coordinator.offer_state(state(), false), coordinator.offer_server(server(), false)]
            } else {
                vec![coordinator.offer_server(server(), false), coordinator.offer_state(state(), false)]
            };

            assert_eq!(outcomes, vec![HandshakeOutcome::Incomplete, HandshakeOutcome::Delivered]);
            assert_eq!(receiver.try_recv().unwrap(), expected());
            assert!(!coordinator.is_pending(GUILD));

            // Un duplicado tardío ya no tiene a quién entregar
            assert_eq!(coordinator.offer_server(server(), false), HandshakeOutcome::Ignored);
        }
    }

    #[test]
    fn test_disconnect_discards_pending() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let mut receiver = coordinator.begin(GUILD, CHANNEL).unwrap();
        coordinator.offer_server(server(), false);

        let left = VoiceStateAssigned {
            channel_id: None,
            ..state()
        };
        assert_eq!(coordinator.offer_state(left, false), HandshakeOutcome::Ignored);
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Closed)));
        assert!(!coordinator.is_pending(GUILD));
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let _receiver = coordinator.begin(GUILD, CHANNEL).unwrap();

        assert!(matches!(
            coordinator.begin(GUILD, CHANNEL),
            Err(LavalinkError::HandshakeInProgress(GUILD))
        ));
        assert_eq!(coordinator.pending_channel(GUILD), Some(CHANNEL));
    }

    #[test]
    fn test_rehandshake_for_existing_player() {
        let coordinator = VoiceHandshakeCoordinator::new();

        assert_eq!(coordinator.offer_server(server(), true), HandshakeOutcome::Incomplete);
        assert_eq!(
            coordinator.offer_state(state(), true),
            HandshakeOutcome::Rehandshake(expected())
        );
        assert_eq!(coordinator.offer_state(state(), false), HandshakeOutcome::Ignored);
    }

    #[test]
    fn test_region_migration_with_server_only() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let _receiver = coordinator.begin(GUILD, CHANNEL).unwrap();
        coordinator.offer_state(state(), false);
        assert_eq!(coordinator.offer_server(server(), false), HandshakeOutcome::Delivered);

        // Discord solo manda el voice server nuevo
        let migrated = VoiceServerAssigned {
            token: "frankfurt-token".into(),
            endpoint: Some("frankfurt9876.discord.media:443".into()),
            ..server()
        };
        assert_eq!(
            coordinator.offer_server(migrated.clone(), true),
            HandshakeOutcome::Rehandshake(VoiceState {
                token: "frankfurt-token".into(),
                endpoint: "frankfurt9876.discord.media:443".into(),
                session_id: "voice-session".into(),
            })
        );

        // Repetir las mismas credenciales no vuelve a tocar el nodo
        assert_eq!(coordinator.offer_server(migrated, true), HandshakeOutcome::Ignored);
        assert_eq!(coordinator.offer_state(state(), true), HandshakeOutcome::Ignored);
    }

    #[test]
    fn test_new_voice_session_reuses_known_server() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let _receiver = coordinator.begin(GUILD, CHANNEL).unwrap();
        coordinator.offer_server(server(), false);
        coordinator.offer_state(state(), false);

        let reconnected = VoiceStateAssigned {
            session_id: "voice-session-2".into(),
            ..state()
        };
        assert_eq!(
            coordinator.offer_state(reconnected, true),
            HandshakeOutcome::Rehandshake(VoiceState {
                session_id: "voice-session-2".into(),
                ..expected()
            })
        );
    }

    #[test]
    fn test_leaving_forgets_known_credentials() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let _receiver = coordinator.begin(GUILD, CHANNEL).unwrap();
        coordinator.offer_server(server(), false);
        coordinator.offer_state(state(), false);

        let left = VoiceStateAssigned {
            channel_id: None,
            ..state()
        };
        coordinator.offer_state(left, true);
        assert_eq!(coordinator.offer_server(server(), true), HandshakeOutcome::Incomplete);
    }

    #[test]
    fn test_server_without_endpoint_is_ignored() {
        let coordinator = VoiceHandshakeCoordinator::new();
        let mut receiver = coordinator.begin(GUILD, CHANNEL).unwrap();

        coordinator.offer_state(state(), false);
        let reassigning = VoiceServerAssigned {
            endpoint: None,
            ..server()
        };
        assert_eq!(coordinator.offer_server(reassigning, false), HandshakeOutcome::Incomplete);
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    }
}
