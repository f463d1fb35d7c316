//! Repeater authentication: receiver ID list and content stream management.

use crate::machine::{step, AuthContext, WaitOutcome};
use crate::signals::RxSignal;
use hdcp_core::caps::RxStatus;
use hdcp_core::context::StreamEntry;
use hdcp_core::error::{AuthError, Result};
use hdcp_core::ids::MessageId;
use hdcp_core::state::AuthState;
use hdcp_protocol::codec;
use tracing::{debug, info, warn};

impl<'a> AuthContext<'a> {
    /// A6 → A7 → A8. The caller has already moved the link into A6.
    ///
    /// A wait timeout is reported as `timeout`; everything else that goes
    /// wrong with the list is `VerifyReceiverIdListFailed`.
    async fn receiver_id_list_round(&mut self, timeout: AuthError) -> Result<()> {
        let polls = self.ctx.policy.list_ready_polls;
        let outcome = self
            .wait_for(
                RxSignal::ReceiverIdListReady,
                std::time::Duration::ZERO,
                polls,
                RxStatus::is_ready,
            )
            .await?;
        if outcome == WaitOutcome::TimedOut {
            warn!("{}: receiver ID list never became ready", self.link.handle());
            return Err(timeout.into());
        }

        self.transition(AuthState::A7).await?;
        step(
            self.recv_message(MessageId::RepeaterAuthSendReceiverIdList).await,
            AuthError::VerifyReceiverIdListFailed,
        )?;

        self.transition(AuthState::A8).await?;
        step(
            self.send_message(MessageId::RepeaterAuthSendAck).await,
            AuthError::VerifyReceiverIdListFailed,
        )?;

        if let Some(list) = &self.ctx.rx.receiver_id_list {
            info!(
                "{}: repeater reports {} downstream devices at depth {}",
                self.link.handle(),
                list.device_count(),
                list.info.depth
            );
            if list.info.hdcp1_device_downstream || list.info.hdcp2_0_repeater_downstream {
                debug!("{}: legacy devices downstream", self.link.handle());
            }
        }
        Ok(())
    }

    /// Receiver ID list exchange during a full authentication.
    ///
    /// A list that never becomes ready fails the attempt; the outer retry
    /// reports `VerifyReceiverIdListFailed` once its budget is spent.
    pub(crate) async fn authenticate_repeater(&mut self) -> Result<()> {
        self.receiver_id_list_round(AuthError::VerifyReceiverIdListFailed)
            .await
    }

    /// Downstream topology change from A5: A6 → A7 → A8 → A5.
    pub async fn reverify_receiver_id_list(&mut self) -> Result<()> {
        self.transition(AuthState::A6).await?;
        match self
            .receiver_id_list_round(AuthError::WaitReceiverIdListFailed)
            .await
        {
            Ok(()) => {
                self.transition(AuthState::A5).await?;
                Ok(())
            }
            Err(e) => {
                warn!("{}: receiver ID list re-verification failed: {}", self.link.handle(), e);
                self.drop_to_h1().await;
                Err(e)
            }
        }
    }

    /// A9: send Stream_Manage for the configured streams and verify M'.
    pub(crate) async fn manage_streams(&mut self) -> Result<()> {
        self.check_abort()?;
        let link_type = self.link.link_type();
        codec::validate_streams(link_type, &self.ctx.tx.streams, self.ctx.policy.max_streams)?;

        let seq_num_m = self
            .ctx
            .tx
            .next_seq_num_m()
            .ok_or(AuthError::StreamManageFailed)?;
        let streams = self.ctx.tx.streams.clone();
        let count = streams.len();
        let prepared = self
            .gateway
            .generate_stream_management(link_type, seq_num_m, streams)
            .await?;
        self.ctx.tx.k = prepared.k;
        self.ctx.tx.streamid_type = prepared.streamid_type;

        self.send_message(MessageId::RepeaterAuthStreamManage).await?;
        self.delay.sleep(self.ctx.policy.stream_ready_delay).await;
        self.recv_message(MessageId::RepeaterAuthStreamReady).await?;
        debug!(
            "{}: {} streams managed with seq_num_M {}",
            self.link.handle(),
            count,
            seq_num_m
        );
        Ok(())
    }

    /// Stream management from A5 for a new stream set: A5 → A9 → A5.
    pub async fn manage_stream(&mut self, streams: Vec<StreamEntry>) -> Result<()> {
        codec::validate_streams(self.link.link_type(), &streams, self.ctx.policy.max_streams)?;
        self.ctx.tx.streams = streams;
        self.transition(AuthState::A9).await?;
        match step(self.manage_streams().await, AuthError::StreamManageFailed) {
            Ok(()) => self.transition(AuthState::A5).await,
            Err(e) => {
                warn!("{}: stream management failed: {}", self.link.handle(), e);
                self.drop_to_h1().await;
                Err(e)
            }
        }
    }
}
