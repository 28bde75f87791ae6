use super::address::AddressMapping;
use super::bank::QueueKind;
use super::request::merge_sorted;
use super::{ConfigError, DramConfig, MemoryController, RequestType, Time};

const MAX_TICKS: u64 = 20_000;

// One channel, one rank, eight banks; mc and dbus clocks at 1 ps so every
// time below reads directly in controller cycles. Slicer layout: offset 6
// bits, bank 3 bits at bit 6, column 8 bits at bit 9, row 10 bits at bit 17.
fn test_config() -> DramConfig {
    DramConfig {
        dbus_period: 1,
        mc_period: 1,
        t_rp: 2,
        t_rcd: 2,
        t_cas: 2,
        t_ras: 8,
        refresh_period: 998_400,
        refreshes_per_period: 128,
        rq_size: 8,
        wq_size: 8,
        pq_size: 8,
        chans: 1,
        ranks: 1,
        banks: 8,
        columns: 1024,
        rows: 1024,
        chan_width: 16,
    }
}

fn make_mc() -> MemoryController {
    MemoryController::new(&test_config(), 1).expect("config should validate")
}

fn make_addr(row: u64, bank: u64, col: u64) -> u64 {
    (row << 17) | (col << 9) | (bank << 6)
}

fn read_request(addr: u64) -> RequestType {
    RequestType {
        address: addr,
        v_address: addr,
        response_requested: true,
        ..Default::default()
    }
}

fn write_request(addr: u64, data: u64) -> RequestType {
    RequestType {
        address: addr,
        v_address: addr,
        data,
        ..Default::default()
    }
}

fn run_until_response(mc: &mut MemoryController, endpoint: usize) {
    for _ in 0..MAX_TICKS {
        if !mc.endpoint(endpoint).returned.is_empty() {
            return;
        }
        mc.operate();
    }
    panic!("no response within {MAX_TICKS} ticks");
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[test]
fn slicer_decodes_the_fields_it_encoded() {
    let mc = make_mc();
    let map = mc.address_mapping();
    let addr = make_addr(813, 5, 97);
    assert_eq!(map.get_row(addr), 813);
    assert_eq!(map.get_bank(addr), 5);
    assert_eq!(map.get_column(addr), 97);
    assert_eq!(map.get_rank(addr), 0);
    assert_eq!(map.get_channel(addr), 0);
}

#[test]
fn slicer_counts_and_size() {
    let mc = make_mc();
    let map = mc.address_mapping();
    assert_eq!(map.rows(), 1024);
    assert_eq!(map.columns(), 1024);
    assert_eq!(map.banks(), 8);
    assert_eq!(map.ranks(), 1);
    assert_eq!(map.channels(), 1);
    assert_eq!(map.prefetch_size(), 4);
    assert_eq!(map.size(), 1 << 27);
}

#[test]
fn collision_ignores_only_the_offset_field() {
    let mc = make_mc();
    let map = mc.address_mapping();
    let addr = make_addr(12, 3, 40);
    assert!(map.is_collision(addr, addr + 63));
    assert!(!map.is_collision(addr, addr + 64));
    assert!(!map.is_collision(addr, make_addr(12, 4, 40)));
}

#[test]
fn zero_prefetch_size_is_rejected() {
    let mut config = test_config();
    config.chan_width = 128;
    let err = MemoryController::new(&config, 1).expect_err("prefetch size 0 must fail");
    assert!(matches!(err, ConfigError::ZeroPrefetchSize));
}

#[test]
fn misaligned_prefetch_is_rejected() {
    let err = AddressMapping::new(24, 2, 1, 8, 1024, 1, 1024)
        .expect_err("48 B fill is not a whole block");
    assert!(matches!(err, ConfigError::MisalignedPrefetch { .. }));
}

#[test]
fn merge_sorted_unions_without_duplicates() {
    assert_eq!(merge_sorted(&[1u64, 3, 5], &[2, 3, 6]), vec![1, 2, 3, 5, 6]);
    assert_eq!(merge_sorted(&[1u64, 2], &[]), vec![1, 2]);
    assert_eq!(merge_sorted::<u64>(&[], &[]), Vec::<u64>::new());
}

#[test]
fn cold_read_pays_activation_and_misses_row_buffer() {
    let mut mc = make_mc();
    let addr = make_addr(5, 0, 3);
    mc.endpoint_mut(0).rq.push_back(read_request(addr));

    mc.operate(); // admitted and scheduled at t = 0
    {
        let bank = &mc.channels()[0].bank_request[0];
        assert!(bank.valid, "bank command should be in flight");
        assert!(!bank.row_buffer_hit);
        assert_eq!(bank.ready_time, 4); // tCAS + tRCD
    }

    run_until_response(&mut mc, 0);
    assert_eq!(mc.current_time(), 9, "response should land at t = 8");
    let resp = mc.endpoint_mut(0).returned.pop_front().expect("response");
    assert_eq!(resp.address, addr);
    assert_eq!(mc.channels()[0].sim_stats().rq_row_buffer_miss(), 1);
    assert_eq!(mc.channels()[0].sim_stats().rq_row_buffer_hit(), 0);
}

#[test]
fn same_row_read_hits_the_open_row() {
    let mut mc = make_mc();
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(5, 0, 3)));
    run_until_response(&mut mc, 0);
    mc.endpoint_mut(0).returned.clear();
    assert_eq!(mc.current_time(), 9);

    // Row 5 is still latched in bank 0.
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(5, 0, 7)));
    mc.operate(); // scheduled at t = 9
    assert!(mc.channels()[0].bank_request[0].row_buffer_hit);
    assert_eq!(mc.channels()[0].bank_request[0].ready_time, 11); // tCAS only

    run_until_response(&mut mc, 0);
    assert_eq!(mc.current_time(), 16, "response should land at t = 15");
    assert_eq!(mc.channels()[0].sim_stats().rq_row_buffer_hit(), 1);
}

#[test]
fn conflicting_row_pays_precharge_on_top_of_activation() {
    let mut mc = make_mc();
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(5, 0, 3)));
    run_until_response(&mut mc, 0);
    mc.endpoint_mut(0).returned.clear();

    // Same bank, different row: tCAS + tRP + tRCD from t = 9.
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(6, 0, 3)));
    mc.operate();
    let bank = &mc.channels()[0].bank_request[0];
    assert!(!bank.row_buffer_hit);
    assert_eq!(bank.ready_time, 15);
    assert_eq!(mc.channels()[0].sim_stats().rq_row_buffer_miss(), 2);
}

#[test]
fn queued_write_forwards_its_data_to_a_read() {
    let mut mc = make_mc();
    let addr = make_addr(9, 2, 1);
    mc.endpoint_mut(0).wq.push_back(write_request(addr, 0xDEAD));
    mc.operate(); // write admitted at t = 0

    mc.endpoint_mut(0).rq.push_back(read_request(addr));
    mc.operate(); // read admitted at t = 1 and completed by the collision scan

    let resp = mc.endpoint_mut(0).returned.pop_front().expect("forwarded response");
    assert_eq!(resp.data, 0xDEAD);
    assert_eq!(resp.address, addr);
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 0);
    // No bank command was ever issued for the read.
    let stats = mc.channels()[0].sim_stats();
    assert_eq!(stats.rq_row_buffer_hit() + stats.rq_row_buffer_miss(), 0);
}

#[test]
fn duplicate_writes_to_a_line_collapse_to_one() {
    let mut mc = make_mc();
    let addr = make_addr(9, 2, 1);
    mc.endpoint_mut(0).wq.push_back(write_request(addr, 1));
    mc.endpoint_mut(0).wq.push_back(write_request(addr + 16, 2));
    mc.operate();
    assert_eq!(mc.queue_occupancy(0, QueueKind::Write), 1);
}

#[test]
fn prefetches_collide_on_block_number() {
    let mut mc = make_mc();
    let addr = make_addr(9, 2, 1);
    mc.endpoint_mut(0).pq.push_back(read_request(addr));
    mc.endpoint_mut(0).pq.push_back(read_request(addr + 16));
    mc.operate();
    assert_eq!(mc.queue_occupancy(0, QueueKind::Prefetch), 1);
}

#[test]
fn refresh_occupies_the_bank_and_defers_the_read() {
    let mut mc = make_mc();
    while mc.current_time() < 7800 {
        mc.operate();
    }

    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(1, 0, 0)));
    mc.operate(); // t = 7800: refresh pulse lands on every idle bank
    {
        let chan = &mc.channels()[0];
        assert!(chan.bank_request[0].under_refresh);
        assert!(chan.bank_request[0].valid);
        assert_eq!(chan.bank_request[0].ready_time, 7880); // (tRP + tRAS) * 8
        assert_eq!(chan.sim_stats().refresh_cycles(), 1);
    }

    // The read sits unscheduled until the refresh completes at t = 7880.
    for _ in 0..79 {
        mc.operate();
        let entry = mc.channels()[0].queue(QueueKind::Read)[0]
            .as_ref()
            .expect("read still queued");
        assert!(!entry.scheduled, "read must wait out the refresh");
    }
    mc.operate(); // t = 7880
    let chan = &mc.channels()[0];
    assert!(!chan.bank_request[0].under_refresh);
    assert!(chan.queue(QueueKind::Read)[0]
        .as_ref()
        .is_some_and(|p| p.scheduled));
}

#[test]
fn refresh_pulses_track_the_refresh_interval() {
    let mut mc = make_mc();
    while mc.current_time() <= 3 * 7800 {
        mc.operate();
    }
    assert_eq!(mc.channels()[0].sim_stats().refresh_cycles(), 3);
}

#[test]
fn promotion_claims_the_prefetch_it_overtakes() {
    let mut mc = make_mc();
    let addr = make_addr(3, 1, 0);
    assert!(mc.add_pq(&read_request(addr), 0));

    let mut promo = read_request(addr);
    promo.promotion = true;
    assert!(mc.add_rq(&promo, 0));

    assert_eq!(mc.queue_occupancy(0, QueueKind::Prefetch), 0);
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 1);

    run_until_response(&mut mc, 0);
    assert_eq!(mc.endpoint(0).returned.len(), 1);
}

#[test]
fn promotion_with_no_prefetch_vanishes() {
    let mut mc = make_mc();
    let mut promo = read_request(make_addr(3, 1, 0));
    promo.promotion = true;
    assert!(mc.add_rq(&promo, 0), "a promotion with nothing to claim is satisfied");
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 0);
}

#[test]
fn full_read_queue_rejects_even_promotions() {
    let mut mc = make_mc();
    for bank in 0..8 {
        assert!(mc.add_rq(&read_request(make_addr(0, bank, 0)), 0));
    }
    let mut promo = read_request(make_addr(1, 0, 0));
    promo.promotion = true;
    assert!(!mc.add_rq(&promo, 0));
}

#[test]
fn full_write_queue_is_counted() {
    let mut mc = make_mc();
    for bank in 0..8 {
        assert!(mc.add_wq(&write_request(make_addr(0, bank, 0), bank)));
    }
    assert!(!mc.add_wq(&write_request(make_addr(1, 0, 0), 9)));
    assert_eq!(mc.channels()[0].sim_stats().wq_full(), 1);
}

#[test]
fn admission_stops_at_the_first_rejection() {
    let mut mc = make_mc();
    for i in 0..9 {
        mc.endpoint_mut(0).rq.push_back(read_request(make_addr(i, 0, 0)));
    }
    mc.operate();
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 8);
    assert_eq!(mc.endpoint(0).rq.len(), 1, "ninth read stays upstream");
}

#[test]
fn colliding_reads_merge_dependents_and_sinks() {
    let mut mc = MemoryController::new(&test_config(), 2).expect("config should validate");
    let addr = make_addr(7, 4, 2);

    let mut first = read_request(addr);
    first.instr_depend_on_me = vec![1, 3];
    let mut second = read_request(addr + 16);
    second.instr_depend_on_me = vec![2, 3];

    assert!(mc.add_rq(&first, 0));
    assert!(mc.add_rq(&second, 1));
    mc.operate();

    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 1);
    {
        let chan = &mc.channels()[0];
        let entry = chan
            .queue(QueueKind::Read)
            .iter()
            .flatten()
            .next()
            .expect("merged entry");
        assert_eq!(entry.instr_depend_on_me, vec![1, 2, 3]);
        assert_eq!(entry.to_return, vec![0, 1]);
    }

    run_until_response(&mut mc, 0);
    assert_eq!(mc.endpoint(0).returned.len(), 1);
    assert_eq!(mc.endpoint(1).returned.len(), 1);
}

#[test]
fn merged_reads_from_one_endpoint_get_one_response() {
    let mut mc = make_mc();
    let addr = make_addr(7, 4, 2);
    assert!(mc.add_rq(&read_request(addr), 0));
    assert!(mc.add_rq(&read_request(addr + 32), 0));
    mc.operate();
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 1);

    run_until_response(&mut mc, 0);
    assert_eq!(mc.endpoint(0).returned.len(), 1);
}

#[test]
fn bus_contention_is_counted_while_a_transfer_drains() {
    let mut mc = make_mc();
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(0, 0, 0)));
    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(0, 1, 0)));

    for _ in 0..14 {
        mc.operate();
    }
    assert_eq!(mc.endpoint(0).returned.len(), 2);

    // Bank 1 was ready at t = 5 but the bus was busy until t = 8.
    let stats = mc.channels()[0].sim_stats();
    assert_eq!(stats.dbus_count_congested(), 3);
    assert_eq!(stats.dbus_cycle_congested(), 6);
    assert_eq!(stats.rq_row_buffer_miss(), 2);
}

#[test]
fn write_mode_flips_on_high_watermark_and_back_on_low() {
    let mut mc = make_mc();
    for bank in 0..7 {
        assert!(mc.add_wq(&write_request(make_addr(0, bank, 0), bank)));
    }
    mc.operate(); // wq occupancy 7 >= 7/8 of 8
    assert!(mc.channels()[0].write_mode(), "high watermark should enter write mode");

    assert!(mc.add_rq(&read_request(make_addr(0, 7, 0)), 0));
    let mut flipped_back = false;
    for _ in 0..MAX_TICKS {
        mc.operate();
        if !mc.channels()[0].write_mode() {
            flipped_back = true;
            break;
        }
    }
    assert!(flipped_back, "pending reads should pull the channel out of write mode");
    assert_eq!(mc.queue_occupancy(0, QueueKind::Write), 5, "low watermark is 6/8 of 8");
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 1);
}

#[test]
fn warmup_completes_everything_without_timing() {
    let mut mc = make_mc();
    mc.warmup = true;
    mc.begin_phase();

    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(1, 0, 0)));
    mc.endpoint_mut(0).pq.push_back(read_request(make_addr(2, 1, 0)));
    mc.endpoint_mut(0).wq.push_back(write_request(make_addr(3, 2, 0), 7));
    mc.operate();

    assert_eq!(mc.endpoint(0).returned.len(), 2, "read and prefetch complete instantly");
    for kind in [QueueKind::Read, QueueKind::Write, QueueKind::Prefetch] {
        assert_eq!(mc.queue_occupancy(0, kind), 0);
    }
    assert!(mc.channels()[0].bank_request.iter().all(|b| !b.valid));
}

#[test]
fn phases_name_channels_and_snapshot_stats() {
    let mut config = test_config();
    config.chans = 2;
    let mut mc = MemoryController::new(&config, 1).expect("config should validate");
    mc.begin_phase();
    assert_eq!(mc.channels()[0].sim_stats().name(), "Channel 0");
    assert_eq!(mc.channels()[1].sim_stats().name(), "Channel 1");

    mc.endpoint_mut(0).rq.push_back(read_request(make_addr(1, 0, 0)));
    run_until_response(&mut mc, 0);
    mc.end_phase();
    assert_eq!(mc.channels()[0].roi_stats().rq_row_buffer_miss(), 1);

    mc.begin_phase();
    assert_eq!(mc.channels()[0].sim_stats().rq_row_buffer_miss(), 0);
    assert_eq!(
        mc.channels()[0].roi_stats().rq_row_buffer_miss(),
        1,
        "snapshot must survive the next phase reset"
    );
}

#[test]
fn requests_route_to_the_channel_in_their_address() {
    let mut config = test_config();
    config.chans = 2;
    let mut mc = MemoryController::new(&config, 1).expect("config should validate");

    // With two channels the channel bit sits directly above the offset.
    let chan0 = 0u64;
    let chan1 = 1u64 << 6;
    assert_eq!(mc.address_mapping().get_channel(chan1), 1);

    mc.endpoint_mut(0).rq.push_back(read_request(chan0));
    mc.endpoint_mut(0).rq.push_back(read_request(chan1));
    mc.operate();
    assert_eq!(mc.queue_occupancy(0, QueueKind::Read), 1);
    assert_eq!(mc.queue_occupancy(1, QueueKind::Read), 1);
}

#[test]
fn distinct_blocks_round_trip_every_request() {
    let mut mc = make_mc();
    let reads = 12u64;
    let writes = 6u64;
    let prefetches = 4u64;

    for i in 0..reads {
        let mut req = read_request((2 * i) << 6);
        req.v_address = req.address + 0x1000;
        mc.endpoint_mut(0).rq.push_back(req);
    }
    for i in 0..writes {
        mc.endpoint_mut(0)
            .wq
            .push_back(write_request((2 * i + 1) << 6, i));
    }
    for i in 0..prefetches {
        mc.endpoint_mut(0).pq.push_back(read_request((100 + 2 * i) << 6));
    }

    for _ in 0..5_000 {
        mc.operate();
    }

    let responses = mc.endpoint(0).returned.len() as u64;
    assert_eq!(responses, reads + prefetches, "every read and prefetch answers once");
    for resp in mc.endpoint(0).returned.iter().take(reads as usize) {
        if resp.v_address != resp.address {
            assert_eq!(resp.v_address, resp.address + 0x1000);
        }
    }
    assert_eq!(
        mc.channels()[0].sim_stats().bus_commands(),
        reads + writes + prefetches,
        "each admitted request issues exactly one bank command"
    );
}

fn assert_bookkeeping(mc: &MemoryController) {
    for chan in mc.channels() {
        let mut backrefs = Vec::new();
        for bank in &chan.bank_request {
            if bank.under_refresh {
                assert!(bank.valid, "a refresh must occupy its bank");
                assert!(bank.pkt.is_none(), "a refresh carries no packet");
            }
            if let Some(slot) = bank.pkt {
                assert!(bank.valid, "a bank holding a packet must be busy");
                let entry = chan.queue(slot.queue)[slot.index]
                    .as_ref()
                    .expect("bank back-reference must point at a live entry");
                assert!(entry.scheduled);
                assert!(
                    !backrefs.contains(&slot),
                    "two banks may not own the same queue slot"
                );
                backrefs.push(slot);
            }
        }
        if let Some(active) = chan.active_request {
            assert!(chan.bank_request[active].valid, "active request must be in flight");
        }

        for kind in [QueueKind::Read, QueueKind::Write, QueueKind::Prefetch] {
            for (index, slot) in chan.queue(kind).iter().enumerate() {
                let Some(entry) = slot else { continue };
                if entry.scheduled {
                    assert_eq!(entry.ready_time, Time::MAX);
                    let owners = backrefs
                        .iter()
                        .filter(|s| s.queue == kind && s.index == index)
                        .count();
                    assert_eq!(owners, 1, "scheduled entry needs exactly one bank owner");
                }
            }
        }

        // No two live writes ever target the same line once scanned.
        let wq = chan.queue(QueueKind::Write);
        for (i, a) in wq.iter().enumerate() {
            let Some(a) = a else { continue };
            for b in wq.iter().skip(i + 1).flatten() {
                assert!(
                    !chan.address_mapping.is_collision(a.address, b.address),
                    "write queue must stay deduplicated"
                );
            }
        }
    }
}

#[test]
fn randomized_workload_keeps_bookkeeping_consistent() {
    let mut mc = MemoryController::new(&test_config(), 2).expect("config should validate");
    // Long enough to cross a refresh pulse under load.
    for tick in 0..9_000u64 {
        for endpoint in 0..2usize {
            let roll = mix64(tick ^ ((endpoint as u64) << 32));
            let addr = (mix64(roll) % 4096) << 6;
            match roll % 5 {
                0 => mc.endpoint_mut(endpoint).wq.push_back(write_request(addr, roll)),
                1 => mc.endpoint_mut(endpoint).pq.push_back(read_request(addr)),
                2 | 3 => mc.endpoint_mut(endpoint).rq.push_back(read_request(addr)),
                _ => {}
            }
        }
        mc.operate();
        assert_bookkeeping(&mc);
    }
}
