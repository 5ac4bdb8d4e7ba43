//! Hub de broadcast: fan-out de notificações para N assinantes.
//!
//! Cada assinante tem sua própria fila (crossbeam, sem limite), então todo
//! assinante recebe toda notificação em ordem de emissão e `publish` nunca
//! bloqueia. Receiver fechado remove o assinante. Depois que `unsubscribe`
//! retorna, nada mais é entregue àquela assinatura, nem o que já estava na fila.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, warn};

/// Identificador de uma assinatura.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Estado compartilhado entre o hub e o lado que consome a fila.
#[derive(Debug, Default)]
struct Delivery {
    active: AtomicBool,
    /// Segurado pela thread do observer durante cada chamada.
    gate: Mutex<()>,
    observer_thread: OnceLock<ThreadId>,
}

impl Delivery {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Desativa e espera a entrega em andamento terminar, exceto quando
    /// chamado de dentro do próprio observer.
    fn close(&self) {
        self.active.store(false, Ordering::Release);
        let inside_observer = self.observer_thread.get() == Some(&std::thread::current().id());
        if !inside_observer {
            drop(self.gate());
        }
    }
}

/// Lado do assinante: recebe notificações em ordem de emissão.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: Receiver<T>,
    delivery: Arc<Delivery>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// `None` quando a assinatura foi encerrada.
    pub fn recv(&self) -> Option<T> {
        let item = self.rx.recv().ok()?;
        self.delivery.is_active().then_some(item)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let item = self.rx.recv_timeout(timeout)?;
        if self.delivery.is_active() {
            Ok(item)
        } else {
            Err(RecvTimeoutError::Disconnected)
        }
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let item = self.rx.try_recv()?;
        if self.delivery.is_active() {
            Ok(item)
        } else {
            Err(TryRecvError::Disconnected)
        }
    }

    /// Drena o que já está na fila.
    pub fn drain(&self) -> Vec<T> {
        if !self.delivery.is_active() {
            return Vec::new();
        }
        self.rx.try_iter().collect()
    }
}

struct Subscriber<T> {
    id: SubscriptionId,
    tx: Sender<T>,
    delivery: Arc<Delivery>,
}

pub struct BroadcastHub<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
    backlog_warn: usize,
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// `backlog_warn`: tamanho de fila a partir do qual um assinante lento é
    /// reportado no log.
    pub fn new(backlog_warn: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            backlog_warn: backlog_warn.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber<T>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = unbounded();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let delivery = Arc::new(Delivery::new());
        self.lock().push(Subscriber {
            id,
            tx,
            delivery: Arc::clone(&delivery),
        });
        debug!("Assinante {:?} registrado", id);
        Subscription { id, rx, delivery }
    }

    /// Roda `observer` numa thread própria para cada notificação.
    ///
    /// Um observer que entra em pânico derruba só a própria thread; o hub
    /// remove o assinante na próxima publicação.
    pub fn subscribe_with<F>(&self, mut observer: F) -> SubscriptionId
    where
        F: FnMut(T) + Send + 'static,
    {
        let sub = self.subscribe();
        let id = sub.id;
        let spawned = std::thread::Builder::new()
            .name(format!("hub-observer-{}", id.0))
            .spawn(move || {
                let delivery = Arc::clone(&sub.delivery);
                let _ = delivery.observer_thread.set(std::thread::current().id());
                while let Ok(item) = sub.rx.recv() {
                    let _gate = delivery.gate();
                    if !delivery.is_active() {
                        break;
                    }
                    observer(item);
                }
            });
        if let Err(e) = spawned {
            warn!("Falha ao criar thread do observer: {e}");
            self.unsubscribe(id);
        }
        id
    }

    /// Remove a assinatura. Idempotente; devolve `false` se já não existia.
    ///
    /// Ao retornar, nenhuma notificação chega mais ao assinante. Se um
    /// observer está no meio de uma entrega, espera ela terminar.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subs = self.lock();
            subs.iter()
                .position(|s| s.id == id)
                .map(|i| subs.remove(i))
        };
        match removed {
            Some(sub) => {
                sub.delivery.close();
                true
            }
            None => false,
        }
    }

    /// Entrega `item` a todos os assinantes sem bloquear.
    pub fn publish(&self, item: &T) {
        let mut subs = self.lock();
        subs.retain(|s| match s.tx.send(item.clone()) {
            Ok(()) => {
                if s.tx.len() == self.backlog_warn {
                    warn!("Assinante {:?} atrasado: {} notificações na fila", s.id, self.backlog_warn);
                }
                true
            }
            Err(_) => {
                debug!("Assinante {:?} desconectado, removendo", s.id);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Notificações enfileiradas e ainda não consumidas, somando todos os assinantes.
    pub fn pending(&self) -> usize {
        self.lock().iter().map(|s| s.tx.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_every_item_in_order() {
        let hub = BroadcastHub::new(16);
        let a = hub.subscribe();
        let b = hub.subscribe();
        for i in 0..5 {
            hub.publish(&i);
        }
        assert_eq!(a.drain(), vec![0, 1, 2, 3, 4]);
        assert_eq!(b.drain(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn slow_subscriber_still_gets_everything() {
        let hub = BroadcastHub::new(2);
        let slow = hub.subscribe();
        let fast = hub.subscribe();
        for i in 0..5 {
            hub.publish(&i);
            assert_eq!(fast.try_recv(), Ok(i));
        }
        assert_eq!(hub.pending(), 5);
        assert_eq!(slow.drain(), vec![0, 1, 2, 3, 4]);
        assert_eq!(hub.pending(), 0);
    }

    #[test]
    fn dropped_receiver_is_removed() {
        let hub = BroadcastHub::new(4);
        let keep = hub.subscribe();
        drop(hub.subscribe());
        hub.publish(&1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(keep.drain(), vec![1]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = BroadcastHub::new(4);
        let sub = hub.subscribe();
        hub.publish(&1);
        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));
        hub.publish(&2);
        assert!(sub.drain().is_empty());
        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn queued_items_are_not_delivered_after_unsubscribe() {
        let hub = Arc::new(BroadcastHub::new(64));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let returned = Arc::new(AtomicBool::new(false));
        let late = Arc::new(Mutex::new(Vec::new()));

        let (seen2, returned2, late2) = (seen.clone(), returned.clone(), late.clone());
        let id = hub.subscribe_with(move |n: i32| {
            if returned2.load(Ordering::SeqCst) {
                late2.lock().unwrap().push(n);
            }
            seen2.lock().unwrap().push(n);
            std::thread::sleep(Duration::from_millis(20));
        });
        for i in 0..10 {
            hub.publish(&i);
        }

        let (hub2, returned3) = (hub.clone(), returned.clone());
        let other = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            assert!(hub2.unsubscribe(id));
            returned3.store(true, Ordering::SeqCst);
        });
        other.join().unwrap();
        let seen_at_return = seen.lock().unwrap().len();
        std::thread::sleep(Duration::from_millis(100));

        assert!(late.lock().unwrap().is_empty());
        assert_eq!(seen.lock().unwrap().len(), seen_at_return);
        assert!(seen_at_return < 10);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_from_inside_observer() {
        let hub = Arc::new(BroadcastHub::new(64));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id_slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let (hub2, seen2, slot2) = (hub.clone(), seen.clone(), id_slot.clone());
        let id = hub.subscribe_with(move |n: i32| {
            seen2.lock().unwrap().push(n);
            if n == 2 {
                if let Some(id) = *slot2.lock().unwrap() {
                    hub2.unsubscribe(id);
                    hub2.unsubscribe(id);
                }
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        let probe = hub.subscribe();
        hub.publish(&1);
        hub.publish(&2);
        // Espera o observer processar o 2 e se remover
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while hub.subscriber_count() > 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        hub.publish(&3);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(probe.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let hub = BroadcastHub::new(8);
        hub.subscribe_with(|_: i32| panic!("observer com defeito"));
        let healthy = hub.subscribe();
        hub.publish(&1);
        std::thread::sleep(Duration::from_millis(50));
        hub.publish(&2);
        hub.publish(&3);
        assert_eq!(healthy.drain(), vec![1, 2, 3]);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
